//! Booking record writer.

use crate::data_api::{CourtDataApi, DataApiError};
use crate::types::{Booking, BookingId, PaymentIntentHandle, PaymentStatus, Reservation};
use courtside_core::environment::Clock;
use serde_json::json;
use std::sync::Arc;

/// Persists booking rows
#[derive(Clone)]
pub struct BookingWriter {
    api: Arc<dyn CourtDataApi>,
    clock: Arc<dyn Clock>,
}

impl BookingWriter {
    /// Create a writer over a Data API
    #[must_use]
    pub fn new(api: Arc<dyn CourtDataApi>, clock: Arc<dyn Clock>) -> Self {
        Self { api, clock }
    }

    /// Write the `pending` booking for a reservation.
    ///
    /// The booking id is derived from the reservation id; if the row already
    /// exists (a retried confirmation) its id is returned without writing.
    ///
    /// # Errors
    ///
    /// Returns [`DataApiError`] if the row cannot be read or written.
    #[tracing::instrument(skip_all, fields(reservation_id = %reservation.id))]
    pub async fn write_pending(
        &self,
        reservation: &Reservation,
        intent: &PaymentIntentHandle,
    ) -> Result<BookingId, DataApiError> {
        let booking_id = BookingId::for_reservation(reservation.id);

        if self
            .api
            .get_booking(reservation.tenant_id, booking_id)
            .await?
            .is_some()
        {
            tracing::debug!(%booking_id, "Booking already written");
            return Ok(booking_id);
        }

        let booking = Booking {
            id: booking_id,
            tenant_id: reservation.tenant_id,
            court_number: reservation.slot.court_number,
            start_time: reservation.slot.start_time,
            end_time: reservation.end_time,
            guest: reservation.guest.clone(),
            payment_status: PaymentStatus::Pending,
            payment_intent_id: intent.id.clone(),
            amount: intent.amount,
            metadata: json!({
                "reservation_id": reservation.id,
                "lines": reservation.quote.lines,
                "currency": reservation.quote.currency,
            }),
            created_at: self.clock.now(),
        };

        self.api.insert_booking(&booking).await?;
        tracing::info!(%booking_id, "Booking written");
        Ok(booking_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::{InMemoryDataApi, sample_intent, sample_reservation};
    use courtside_testing::mocks::test_clock;

    #[tokio::test]
    async fn test_writes_pending_booking_with_intent() {
        let api = Arc::new(InMemoryDataApi::new());
        let writer = BookingWriter::new(api.clone(), Arc::new(test_clock()));
        let reservation = sample_reservation();
        let intent = sample_intent(&reservation);

        let booking_id = writer.write_pending(&reservation, &intent).await.unwrap();

        let booking = api.booking(booking_id).unwrap();
        assert_eq!(booking.payment_status, PaymentStatus::Pending);
        assert_eq!(booking.payment_intent_id, intent.id);
        assert_eq!(booking.amount, reservation.quote.total);
        assert_eq!(booking.metadata["reservation_id"], json!(reservation.id));
    }

    #[tokio::test]
    async fn test_second_write_is_a_no_op() {
        let api = Arc::new(InMemoryDataApi::new());
        let writer = BookingWriter::new(api.clone(), Arc::new(test_clock()));
        let reservation = sample_reservation();
        let intent = sample_intent(&reservation);

        let first = writer.write_pending(&reservation, &intent).await.unwrap();
        let second = writer.write_pending(&reservation, &intent).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(api.call_count("insert_booking"), 1);
    }
}
