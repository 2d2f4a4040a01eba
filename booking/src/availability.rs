//! Availability record accessor.
//!
//! Reads and writes court slot status through the Data API. Every status
//! change is checked against the [`AvailabilityStatus`] state machine before
//! any remote call, then issued as a conditional update on the expected
//! current status; a zero row count means another writer got there first.
//!
//! Holds are owned: `hold` stamps the slot with the reservation id, and
//! `release`/`book` only match a slot held by that same reservation.

use crate::data_api::{CourtDataApi, DataApiError};
use crate::types::{
    Availability, AvailabilityStatus, InvalidTransition, ReservationId, SlotKey, TenantId,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Longest slot that can be published
fn max_slot_length() -> Duration {
    Duration::hours(24)
}

/// Errors raised by availability operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AvailabilityError {
    /// The slot is not available (already held, booked, or missing)
    #[error("slot {0} is not available")]
    SlotUnavailable(SlotKey),

    /// The state machine does not allow the requested change
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// The slot was not in the expected status
    #[error("slot {slot} is not {expected}")]
    StatusConflict {
        /// Slot
        slot: SlotKey,
        /// Status the update expected
        expected: AvailabilityStatus,
    },

    /// Slots to publish are malformed or overlap
    #[error("invalid slots: {0}")]
    InvalidSlots(String),

    /// Data API failure
    #[error(transparent)]
    Upstream(#[from] DataApiError),
}

/// Reads and writes availability rows
#[derive(Clone)]
pub struct AvailabilityAccessor {
    api: Arc<dyn CourtDataApi>,
}

impl AvailabilityAccessor {
    /// Create an accessor over a Data API
    #[must_use]
    pub fn new(api: Arc<dyn CourtDataApi>) -> Self {
        Self { api }
    }

    /// Change a slot's status from `from` to `to` on behalf of `holder`.
    ///
    /// Returns `false` if no row was in status `from` (or, when leaving
    /// `held`, no row was held by `holder`).
    ///
    /// # Errors
    ///
    /// Returns [`AvailabilityError::InvalidTransition`] without calling the
    /// Data API if the transition is illegal.
    pub async fn transition(
        &self,
        slot: &SlotKey,
        from: AvailabilityStatus,
        to: AvailabilityStatus,
        holder: ReservationId,
    ) -> Result<bool, AvailabilityError> {
        from.transition_to(to)?;
        let affected = self
            .api
            .update_availability_status(slot, from, to, holder)
            .await?;
        tracing::debug!(%slot, %from, %to, %holder, affected, "Availability transition");
        Ok(affected > 0)
    }

    /// `available -> held`
    ///
    /// # Errors
    ///
    /// Returns [`AvailabilityError::SlotUnavailable`] if the slot is not
    /// currently available.
    #[tracing::instrument(skip(self), fields(slot = %slot))]
    pub async fn hold(&self, slot: &SlotKey, holder: ReservationId) -> Result<(), AvailabilityError> {
        if self
            .transition(slot, AvailabilityStatus::Available, AvailabilityStatus::Held, holder)
            .await?
        {
            Ok(())
        } else {
            Err(AvailabilityError::SlotUnavailable(slot.clone()))
        }
    }

    /// `held -> available`
    ///
    /// # Errors
    ///
    /// Returns [`AvailabilityError::StatusConflict`] if the slot is not held
    /// by `holder`.
    #[tracing::instrument(skip(self), fields(slot = %slot))]
    pub async fn release(&self, slot: &SlotKey, holder: ReservationId) -> Result<(), AvailabilityError> {
        if self
            .transition(slot, AvailabilityStatus::Held, AvailabilityStatus::Available, holder)
            .await?
        {
            Ok(())
        } else {
            Err(AvailabilityError::StatusConflict {
                slot: slot.clone(),
                expected: AvailabilityStatus::Held,
            })
        }
    }

    /// `held -> booked`
    ///
    /// A slot already booked by `holder` counts as success, so a retried
    /// confirmation does not fail on its own earlier write.
    ///
    /// # Errors
    ///
    /// Returns [`AvailabilityError::StatusConflict`] if the slot is neither
    /// held nor booked by `holder`.
    #[tracing::instrument(skip(self), fields(slot = %slot))]
    pub async fn book(&self, slot: &SlotKey, holder: ReservationId) -> Result<(), AvailabilityError> {
        if self
            .transition(slot, AvailabilityStatus::Held, AvailabilityStatus::Booked, holder)
            .await?
        {
            return Ok(());
        }

        match self.api.get_availability(slot).await? {
            Some(current)
                if current.status == AvailabilityStatus::Booked
                    && current.held_by == Some(holder) =>
            {
                tracing::debug!(%slot, "Slot already booked");
                Ok(())
            },
            _ => Err(AvailabilityError::StatusConflict {
                slot: slot.clone(),
                expected: AvailabilityStatus::Held,
            }),
        }
    }

    /// Slots of a court on a UTC day, ordered by start time
    ///
    /// # Errors
    ///
    /// Returns [`AvailabilityError::Upstream`] on Data API failure.
    pub async fn list(
        &self,
        tenant_id: TenantId,
        court_number: u32,
        day: NaiveDate,
    ) -> Result<Vec<Availability>, AvailabilityError> {
        let from = day.and_time(chrono::NaiveTime::MIN).and_utc();
        let to = from + Duration::days(1);
        let mut slots = self
            .api
            .list_availability(tenant_id, court_number, from, to)
            .await?;
        slots.sort_by_key(|s| s.start_time);
        Ok(slots)
    }

    /// Publish new `available` slots for a court.
    ///
    /// # Errors
    ///
    /// Returns [`AvailabilityError::InvalidSlots`] if a range is empty,
    /// inverted, longer than a day, or overlaps another new or existing slot.
    #[tracing::instrument(skip(self, ranges), fields(count = ranges.len()))]
    pub async fn publish(
        &self,
        tenant_id: TenantId,
        court_number: u32,
        ranges: &[(DateTime<Utc>, DateTime<Utc>)],
    ) -> Result<Vec<Availability>, AvailabilityError> {
        let mut sorted = ranges.to_vec();
        sorted.sort_by_key(|(start, _)| *start);

        let (Some(first), Some(last_end)) = (sorted.first(), sorted.iter().map(|r| r.1).max())
        else {
            return Err(AvailabilityError::InvalidSlots("no slots given".into()));
        };

        for (start, end) in &sorted {
            if end <= start {
                return Err(AvailabilityError::InvalidSlots(format!(
                    "slot starting {start} does not end after it starts"
                )));
            }
            if *end - *start > max_slot_length() {
                return Err(AvailabilityError::InvalidSlots(format!(
                    "slot starting {start} is longer than a day"
                )));
            }
        }

        if let Some(pair) = sorted.windows(2).find(|w| w[1].0 < w[0].1) {
            return Err(AvailabilityError::InvalidSlots(format!(
                "slots starting {} and {} overlap",
                pair[0].0, pair[1].0
            )));
        }

        let existing = self
            .api
            .list_availability(tenant_id, court_number, first.0 - max_slot_length(), last_end)
            .await?;
        for (start, end) in &sorted {
            if let Some(clash) = existing
                .iter()
                .find(|e| e.start_time < *end && *start < e.end_time)
            {
                return Err(AvailabilityError::InvalidSlots(format!(
                    "slot starting {start} overlaps existing slot starting {}",
                    clash.start_time
                )));
            }
        }

        let slots: Vec<Availability> = sorted
            .into_iter()
            .map(|(start_time, end_time)| Availability {
                tenant_id,
                court_number,
                start_time,
                end_time,
                status: AvailabilityStatus::Available,
                held_by: None,
            })
            .collect();

        self.api.insert_availability(&slots).await?;
        tracing::info!(%tenant_id, court_number, count = slots.len(), "Published availability");
        Ok(slots)
    }
}
