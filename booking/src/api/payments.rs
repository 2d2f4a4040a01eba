//! Guest payment endpoint: hold a slot and create its payment intent.
//!
//! - POST /api/stripe/create-payment-intent
//!
//! # Flow
//!
//! 1. **Quote**: price the selected products over the published slot
//! 2. **Reserve**: the saga records the intent, holds the slot and requests a
//!    payment intent on the tenant's merchant account
//! 3. **Respond**: the client secret the guest pays with, and the hold expiry
//!
//! The slot stays held until the guest confirms or the hold expires.

use crate::error::store_error;
use crate::pricing;
use crate::reservation::ReservationAction;
use crate::server::state::AppState;
use crate::types::{
    GuestInfo, Money, ProductId, ProductSelection, ReservationId, SlotKey, TenantId,
};
use axum::{Json, extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
use courtside_web::{AppError, CorrelationId, ValidJson};
use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to reserve a slot and start payment.
#[derive(Debug, Deserialize)]
pub struct CreatePaymentIntentRequest {
    /// Tenant (facility)
    pub tenant_id: TenantId,
    /// Court within the tenant
    pub court_number: u32,
    /// Slot start
    pub start_time: DateTime<Utc>,
    /// Slot end; must match the published slot
    pub end_time: DateTime<Utc>,
    /// Selected court and equipment products
    pub products: Vec<ProductSelection>,
    /// Guest contact details
    pub guest: GuestInfo,
}

/// Response with the payment intent the guest pays through.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePaymentIntentResponse {
    /// Reservation to confirm once paid
    pub reservation_id: ReservationId,
    /// Payment intent id
    pub payment_intent_id: String,
    /// Secret the client confirms the payment with
    pub client_secret: String,
    /// Amount in cents
    pub amount: Money,
    /// Lowercase ISO currency
    pub currency: String,
    /// When the hold lapses
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Reserve a slot and create its payment intent.
///
/// Public endpoint: guests book without an account.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/stripe/create-payment-intent \
///   -H "Content-Type: application/json" \
///   -d '{
///     "tenant_id": "550e8400-e29b-41d4-a716-446655440000",
///     "court_number": 1,
///     "start_time": "2025-06-01T18:00:00Z",
///     "end_time": "2025-06-01T19:30:00Z",
///     "products": [{"product_id": "660e8400-e29b-41d4-a716-446655440001"}],
///     "guest": {"name": "Ada", "email": "ada@example.com"}
///   }'
/// ```
///
/// # Errors
///
/// - 400 for an invalid guest or selection, or an end time other than the slot's
/// - 404 for an unknown tenant, court, slot or product
/// - 409 when the slot is taken or the tenant has no merchant account
/// - 502 when the Data API or the payment platform fails
/// - 504 when the saga does not answer in time
#[tracing::instrument(skip_all, fields(correlation_id = %correlation_id.0, tenant_id = %request.tenant_id))]
pub async fn create_payment_intent(
    correlation_id: CorrelationId,
    State(state): State<AppState>,
    ValidJson(request): ValidJson<CreatePaymentIntentRequest>,
) -> Result<(StatusCode, Json<CreatePaymentIntentResponse>), AppError> {
    request.guest.validate().map_err(AppError::validation)?;

    let tenant = state
        .data_api
        .get_tenant(request.tenant_id)
        .await?
        .ok_or_else(|| AppError::not_found("Tenant", request.tenant_id))?;

    if state
        .data_api
        .get_court(tenant.id, request.court_number)
        .await?
        .is_none()
    {
        return Err(AppError::not_found("Court", request.court_number));
    }

    let key = SlotKey {
        tenant_id: tenant.id,
        court_number: request.court_number,
        start_time: request.start_time,
    };
    let slot = state
        .data_api
        .get_availability(&key)
        .await?
        .ok_or_else(|| AppError::not_found("Slot", &key))?;
    if request.end_time != slot.end_time {
        return Err(AppError::validation(format!(
            "end_time must be {} for this slot",
            slot.end_time.to_rfc3339()
        )));
    }

    let ids: Vec<ProductId> = request.products.iter().map(|s| s.product_id).collect();
    let products = state.data_api.list_products(tenant.id, &ids).await?;
    let quote = pricing::quote(
        tenant.id,
        &products,
        &request.products,
        slot.start_time,
        slot.end_time,
        &state.settings.currency,
    )?;

    let reservation_id = ReservationId::new();
    tracing::info!(%reservation_id, amount = quote.total.cents(), "Reserving slot");

    let outcome = state
        .store
        .send_and_wait_for(
            ReservationAction::ReserveSlot {
                reservation_id,
                tenant_id: tenant.id,
                merchant_account_id: tenant.stripe_account_id,
                court_number: request.court_number,
                start_time: slot.start_time,
                end_time: slot.end_time,
                guest: request.guest,
                quote,
            },
            |a| a.settles_reserve(reservation_id),
            state.settings.response_timeout,
        )
        .await
        .map_err(store_error)?;

    match outcome {
        ReservationAction::PaymentRequested {
            intent, expires_at, ..
        } => Ok((
            StatusCode::CREATED,
            Json(CreatePaymentIntentResponse {
                reservation_id,
                payment_intent_id: intent.id,
                client_secret: intent.client_secret,
                amount: intent.amount,
                currency: intent.currency,
                expires_at,
            }),
        )),
        ReservationAction::ReservationFailed { error, .. } => Err(error.into()),
        other => Err(AppError::internal(format!(
            "unexpected reservation outcome: {other:?}"
        ))),
    }
}
