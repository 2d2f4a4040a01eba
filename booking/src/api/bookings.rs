//! Booking confirmation endpoint.
//!
//! - POST /api/bookings/confirm
//!
//! Called by the guest's client after the payment platform accepted the
//! payment. The saga writes the booking with payment status `pending` and
//! marks the slot booked; the payment itself is not checked here.

use crate::error::{ReservationError, store_error};
use crate::reservation::ReservationAction;
use crate::server::state::AppState;
use crate::types::{BookingId, ReservationId, TenantId};
use axum::{Json, extract::State, http::StatusCode};
use courtside_web::{AppError, CorrelationId, ValidJson};
use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to confirm a paid reservation.
#[derive(Debug, Deserialize)]
pub struct ConfirmBookingRequest {
    /// Tenant the reservation belongs to
    pub tenant_id: TenantId,
    /// Reservation returned by create-payment-intent
    pub reservation_id: ReservationId,
}

/// Confirmation result.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmBookingResponse {
    /// Reservation ID
    pub reservation_id: ReservationId,
    /// Booking ID
    pub booking_id: BookingId,
    /// `confirmed`, or `pending_confirmation` while the slot update is retried
    pub status: String,
    /// Payment status recorded on the booking
    pub payment_status: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Confirm a booking after payment.
///
/// Reservations this process does not hold in memory (restart, another
/// instance) are loaded from their intent record first.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/bookings/confirm \
///   -H "Content-Type: application/json" \
///   -d '{"tenant_id": "550e8400-...", "reservation_id": "770e8400-..."}'
/// ```
///
/// # Errors
///
/// - 404 if the reservation does not exist for this tenant
/// - 409 if the hold expired or the reservation was released
/// - 502 when the Data API or the payment platform fails
/// - 504 when the saga does not answer in time
#[tracing::instrument(skip_all, fields(correlation_id = %correlation_id.0, reservation_id = %request.reservation_id))]
pub async fn confirm_booking(
    correlation_id: CorrelationId,
    State(state): State<AppState>,
    ValidJson(request): ValidJson<ConfirmBookingRequest>,
) -> Result<(StatusCode, Json<ConfirmBookingResponse>), AppError> {
    let reservation_id = request.reservation_id;

    let tracked = state.store.state(|s| s.contains(&reservation_id)).await;
    if !tracked {
        let record = state
            .ledger
            .load(reservation_id)
            .await?
            .filter(|r| r.tenant_id == request.tenant_id)
            .ok_or(ReservationError::NotFound)?;

        tracing::info!(stage = %record.stage, "Restoring reservation from its intent record");
        state
            .store
            .send(ReservationAction::RestoreReservation {
                reservation: Box::new(record),
            })
            .await
            .map_err(store_error)?;
    }

    let outcome = state
        .store
        .send_and_wait_for(
            ReservationAction::ConfirmBooking {
                reservation_id,
                tenant_id: request.tenant_id,
            },
            |a| a.settles_confirm(reservation_id),
            state.settings.response_timeout,
        )
        .await
        .map_err(store_error)?;

    match outcome {
        ReservationAction::BookingConfirmed { booking_id, .. } => Ok((
            StatusCode::OK,
            Json(ConfirmBookingResponse {
                reservation_id,
                booking_id,
                status: "confirmed".to_string(),
                payment_status: "pending".to_string(),
            }),
        )),
        ReservationAction::SlotBookFailed { error, .. } => {
            tracing::warn!(%error, "Booking written, slot update pending");
            Ok((
                StatusCode::ACCEPTED,
                Json(ConfirmBookingResponse {
                    reservation_id,
                    booking_id: BookingId::for_reservation(reservation_id),
                    status: "pending_confirmation".to_string(),
                    payment_status: "pending".to_string(),
                }),
            ))
        },
        ReservationAction::ReservationFailed { error, .. } => Err(error.into()),
        other => Err(AppError::internal(format!(
            "unexpected confirmation outcome: {other:?}"
        ))),
    }
}
