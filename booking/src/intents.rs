//! Reservation intent ledger.
//!
//! The ledger is the saga's outbox: a reservation is recorded before any
//! availability row is touched and re-saved at every stage change, so the
//! reconciliation sweeper can finish or compensate work a crashed or
//! timed-out request left behind.

use crate::data_api::{CourtDataApi, DataApiError};
use crate::types::{Reservation, ReservationId};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Persists reservation intent records
#[derive(Clone)]
pub struct IntentLedger {
    api: Arc<dyn CourtDataApi>,
}

impl IntentLedger {
    /// Create a ledger over a Data API
    #[must_use]
    pub fn new(api: Arc<dyn CourtDataApi>) -> Self {
        Self { api }
    }

    /// Record a new reservation
    ///
    /// # Errors
    ///
    /// Returns [`DataApiError`] if the record cannot be written.
    #[tracing::instrument(skip_all, fields(reservation_id = %reservation.id))]
    pub async fn record(&self, reservation: &Reservation) -> Result<(), DataApiError> {
        self.api.insert_reservation(reservation).await
    }

    /// Save the current stage of a reservation
    ///
    /// # Errors
    ///
    /// Returns [`DataApiError`] if the record cannot be written.
    #[tracing::instrument(skip_all, fields(reservation_id = %reservation.id, stage = %reservation.stage))]
    pub async fn save(&self, reservation: &Reservation) -> Result<(), DataApiError> {
        self.api.update_reservation(reservation).await
    }

    /// Save, logging instead of failing.
    ///
    /// Used after state the saga cannot undo; a missed save leaves the
    /// record at an earlier stage, which the sweeper re-drives.
    pub async fn save_or_log(&self, reservation: &Reservation) {
        if let Err(error) = self.save(reservation).await {
            tracing::warn!(
                reservation_id = %reservation.id,
                stage = %reservation.stage,
                %error,
                "Failed to save reservation intent"
            );
        }
    }

    /// Load a reservation record
    ///
    /// # Errors
    ///
    /// Returns [`DataApiError`] if the record cannot be read.
    pub async fn load(&self, id: ReservationId) -> Result<Option<Reservation>, DataApiError> {
        self.api.get_reservation(id).await
    }

    /// Open reservations whose hold lapsed before `before`
    ///
    /// # Errors
    ///
    /// Returns [`DataApiError`] if the records cannot be read.
    pub async fn stale(&self, before: DateTime<Utc>) -> Result<Vec<Reservation>, DataApiError> {
        self.api.list_stale_reservations(before).await
    }
}
