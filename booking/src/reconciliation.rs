//! Reconciliation sweeper.
//!
//! Finishes or compensates reservations whose hold lapsed without the saga
//! reaching a terminal stage: a crashed process, a lost timer, a release that
//! exhausted its retries, a booking whose slot update failed.
//!
//! Each sweep:
//! 1. Lists open intent records whose expiry passed
//! 2. Restores records this process does not track into the store
//! 3. Dispatches `ExpireHold` for each, which releases, rolls forward or
//!    books depending on the stage
//! 4. Re-saves records the store already settled but the ledger missed
//! 5. Prunes settled reservations older than the retention period

use crate::data_api::DataApiError;
use crate::intents::IntentLedger;
use crate::metrics;
use crate::reservation::{ReservationAction, ReservationStore};
use courtside_core::environment::Clock;
use courtside_runtime::StoreError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Errors that abort a sweep
#[derive(Debug, Error)]
pub enum SweepError {
    /// Intent records could not be listed
    #[error(transparent)]
    DataApi(#[from] DataApiError),

    /// The store rejected an action
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Records loaded into the store
    pub restored: usize,
    /// `ExpireHold` actions dispatched
    pub dispatched: usize,
    /// Settled records re-saved to the ledger
    pub resynced: usize,
    /// Settled reservations dropped from memory
    pub pruned: usize,
}

/// Periodically resolves stale reservations
pub struct ReconciliationSweeper {
    store: ReservationStore,
    ledger: IntentLedger,
    clock: Arc<dyn Clock>,
    interval: Duration,
    retention: Duration,
    shutdown: watch::Receiver<bool>,
}

impl ReconciliationSweeper {
    /// Create a sweeper.
    ///
    /// Returns the sweeper and a shutdown sender; send `true` to stop it.
    #[must_use]
    pub fn new(
        store: ReservationStore,
        ledger: IntentLedger,
        clock: Arc<dyn Clock>,
        interval: Duration,
        retention: Duration,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = Self {
            store,
            ledger,
            clock,
            interval,
            retention,
            shutdown: shutdown_rx,
        };
        (sweeper, shutdown_tx)
    }

    /// Run one sweep
    ///
    /// # Errors
    ///
    /// Returns [`SweepError`] if stale records cannot be listed or the store
    /// is shutting down.
    #[tracing::instrument(skip(self), name = "reconciliation_sweep")]
    pub async fn sweep_once(&self) -> Result<SweepReport, SweepError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for record in self.ledger.stale(now).await? {
            let reservation_id = record.id;
            let tracked = self
                .store
                .state(|s| s.get(&reservation_id).cloned())
                .await;

            match tracked {
                Some(current) if current.stage.is_terminal() => {
                    tracing::info!(%reservation_id, stage = %current.stage, "Re-saving settled reservation");
                    self.ledger.save_or_log(&current).await;
                    report.resynced += 1;
                    continue;
                },
                Some(_) => {},
                None => {
                    tracing::info!(%reservation_id, stage = %record.stage, "Restoring stale reservation");
                    self.store
                        .send(ReservationAction::RestoreReservation {
                            reservation: Box::new(record),
                        })
                        .await?;
                    report.restored += 1;
                },
            }

            self.store
                .send(ReservationAction::ExpireHold { reservation_id })
                .await?;
            report.dispatched += 1;
        }

        let retention = chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::zero());
        let before = self.store.state(|s| s.reservations.len()).await;
        self.store
            .send(ReservationAction::PruneSettled {
                before: now - retention,
            })
            .await?;
        let after = self.store.state(|s| s.reservations.len()).await;
        report.pruned = before.saturating_sub(after);

        metrics::record_sweep();
        if report != SweepReport::default() {
            tracing::info!(?report, "Reconciliation sweep finished");
        }
        Ok(report)
    }

    /// Sweep every interval until shut down
    pub async fn run(mut self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Reconciliation sweeper started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep_once().await {
                        tracing::warn!(%error, "Reconciliation sweep failed");
                    }
                },
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                },
            }
        }

        tracing::info!("Reconciliation sweeper stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::{InMemoryDataApi, MockPaymentPlatform, sample_reservation, test_environment};
    use crate::reservation::{ReservationReducer, ReservationState};
    use crate::types::{Availability, AvailabilityStatus, ReservationStage};
    use courtside_testing::mocks::ManualClock;

    fn held_slot(api: &InMemoryDataApi, reservation: &crate::types::Reservation) {
        api.seed_availability(Availability {
            tenant_id: reservation.tenant_id,
            court_number: reservation.slot.court_number,
            start_time: reservation.slot.start_time,
            end_time: reservation.end_time,
            status: AvailabilityStatus::Held,
            held_by: Some(reservation.id),
        });
    }

    fn sweeper_for(
        api: &Arc<InMemoryDataApi>,
        clock: &Arc<ManualClock>,
    ) -> (ReservationStore, ReconciliationSweeper, watch::Sender<bool>) {
        let env = test_environment(api.clone(), Arc::new(MockPaymentPlatform::new()), clock.clone());
        let store = ReservationStore::new(ReservationState::default(), ReservationReducer::new(), env);
        let (sweeper, shutdown) = ReconciliationSweeper::new(
            store.clone(),
            IntentLedger::new(api.clone()),
            clock.clone(),
            Duration::from_secs(60),
            Duration::from_secs(3600),
        );
        (store, sweeper, shutdown)
    }

    async fn settle(store: &ReservationStore) {
        for _ in 0..100 {
            if store.pending_effects() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_sweep_releases_abandoned_hold() {
        let api = Arc::new(InMemoryDataApi::new());
        let clock = Arc::new(ManualClock::default());
        let mut record = sample_reservation();
        record.stage = ReservationStage::Held;
        held_slot(&api, &record);
        api.seed_reservation(record.clone());
        clock.advance(chrono::Duration::minutes(11));

        let env = test_environment(api.clone(), Arc::new(MockPaymentPlatform::new()), clock.clone());
        let store = ReservationStore::new(ReservationState::default(), ReservationReducer::new(), env);
        let (sweeper, _shutdown) = ReconciliationSweeper::new(
            store.clone(),
            IntentLedger::new(api.clone()),
            clock,
            Duration::from_secs(60),
            Duration::from_secs(3600),
        );

        let report = sweeper.sweep_once().await.unwrap();
        settle(&store).await;

        assert_eq!(report.restored, 1);
        assert_eq!(report.dispatched, 1);
        assert_eq!(api.availability_status(&record.slot), Some(AvailabilityStatus::Available));
        assert_eq!(api.reservation(record.id).unwrap().stage, ReservationStage::Released);
    }

    #[tokio::test]
    async fn test_sweep_releases_hold_recorded_before_intent_stage() {
        // The process died between holding the slot and recording the hold
        let api = Arc::new(InMemoryDataApi::new());
        let clock = Arc::new(ManualClock::default());
        let record = sample_reservation();
        assert_eq!(record.stage, ReservationStage::Initiated);
        held_slot(&api, &record);
        api.seed_reservation(record.clone());
        clock.advance(chrono::Duration::minutes(11));

        let (store, sweeper, _shutdown) = sweeper_for(&api, &clock);
        let report = sweeper.sweep_once().await.unwrap();
        settle(&store).await;

        assert_eq!(report.restored, 1);
        assert_eq!(api.availability_status(&record.slot), Some(AvailabilityStatus::Available));
        assert_eq!(api.availability_holder(&record.slot), None);
        assert_eq!(api.reservation(record.id).unwrap().stage, ReservationStage::Released);
    }

    #[tokio::test]
    async fn test_sweep_leaves_slot_held_by_another_reservation() {
        let api = Arc::new(InMemoryDataApi::new());
        let clock = Arc::new(ManualClock::default());
        let record = sample_reservation();
        let mut winner = sample_reservation();
        winner.slot = record.slot.clone();
        winner.tenant_id = record.tenant_id;
        winner.end_time = record.end_time;
        held_slot(&api, &winner);
        api.seed_reservation(record.clone());
        clock.advance(chrono::Duration::minutes(11));

        let (store, sweeper, _shutdown) = sweeper_for(&api, &clock);
        sweeper.sweep_once().await.unwrap();
        settle(&store).await;

        assert_eq!(api.availability_status(&record.slot), Some(AvailabilityStatus::Held));
        assert_eq!(api.availability_holder(&record.slot), Some(winner.id));
        assert_eq!(api.reservation(record.id).unwrap().stage, ReservationStage::Released);
    }

    #[tokio::test]
    async fn test_sweep_ignores_unexpired_records() {
        let api = Arc::new(InMemoryDataApi::new());
        let clock = Arc::new(ManualClock::default());
        let mut record = sample_reservation();
        record.stage = ReservationStage::Held;
        held_slot(&api, &record);
        api.seed_reservation(record.clone());

        let env = test_environment(api.clone(), Arc::new(MockPaymentPlatform::new()), clock.clone());
        let store = ReservationStore::new(ReservationState::default(), ReservationReducer::new(), env);
        let (sweeper, _shutdown) = ReconciliationSweeper::new(
            store,
            IntentLedger::new(api.clone()),
            clock,
            Duration::from_secs(60),
            Duration::from_secs(3600),
        );

        let report = sweeper.sweep_once().await.unwrap();

        assert_eq!(report, SweepReport::default());
        assert_eq!(api.availability_status(&record.slot), Some(AvailabilityStatus::Held));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let api = Arc::new(InMemoryDataApi::new());
        let clock = Arc::new(ManualClock::default());
        let env = test_environment(api.clone(), Arc::new(MockPaymentPlatform::new()), clock.clone());
        let store = ReservationStore::new(ReservationState::default(), ReservationReducer::new(), env);
        let (sweeper, shutdown) = ReconciliationSweeper::new(
            store,
            IntentLedger::new(api.clone()),
            clock,
            Duration::from_millis(10),
            Duration::from_secs(3600),
        );

        let handle = tokio::spawn(sweeper.run());
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(api.call_count("list_stale_reservations") >= 1);
    }
}
