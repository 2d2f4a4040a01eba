//! Reservation errors and their HTTP mapping.

use crate::availability::AvailabilityError;
use crate::data_api::DataApiError;
use crate::identity::IdentityError;
use crate::payments::PaymentPlatformError;
use crate::pricing::PricingError;
use axum::http::StatusCode;
use courtside_runtime::StoreError;
use courtside_web::AppError;
use thiserror::Error;

/// Why a reservation or confirmation did not go through
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationError {
    /// The slot is held or booked by someone else
    #[error("slot is not available")]
    SlotUnavailable,

    /// The hold lapsed or was released
    #[error("reservation has expired")]
    Expired,

    /// No such reservation for this tenant
    #[error("reservation not found")]
    NotFound,

    /// The reservation is not in a stage that allows the request
    #[error("{0}")]
    InvalidState(String),

    /// The tenant has no connected merchant account
    #[error("tenant has not connected a payment account")]
    NotConnected,

    /// The request is malformed
    #[error("{0}")]
    Validation(String),

    /// An upstream platform failed
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl ReservationError {
    /// Machine-readable code used in error bodies and metric labels
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SlotUnavailable => "SLOT_UNAVAILABLE",
            Self::Expired => "RESERVATION_EXPIRED",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::NotConnected => "ACCOUNT_NOT_CONNECTED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Upstream(_) => "UPSTREAM_ERROR",
        }
    }

    const fn status(&self) -> StatusCode {
        match self {
            Self::SlotUnavailable | Self::Expired | Self::InvalidState(_) | Self::NotConnected => {
                StatusCode::CONFLICT
            },
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<ReservationError> for AppError {
    fn from(err: ReservationError) -> Self {
        Self::new(err.status(), err.to_string(), err.code().to_string())
    }
}

impl From<AvailabilityError> for AppError {
    fn from(err: AvailabilityError) -> Self {
        match err {
            AvailabilityError::SlotUnavailable(_) => ReservationError::SlotUnavailable.into(),
            AvailabilityError::InvalidTransition(_) | AvailabilityError::StatusConflict { .. } => {
                Self::conflict(err.to_string())
            },
            AvailabilityError::InvalidSlots(message) => Self::validation(message),
            AvailabilityError::Upstream(upstream) => upstream.into(),
        }
    }
}

impl From<DataApiError> for AppError {
    fn from(err: DataApiError) -> Self {
        Self::bad_gateway(err.to_string())
    }
}

impl From<PaymentPlatformError> for AppError {
    fn from(err: PaymentPlatformError) -> Self {
        Self::bad_gateway(err.to_string())
    }
}

impl From<PricingError> for AppError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::UnknownProduct(id) => Self::not_found("Product", id),
            other => Self::validation(other.to_string()),
        }
    }
}

impl From<IdentityError> for AppError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Unauthenticated => Self::unauthorized(err.to_string()),
            IdentityError::Upstream(_) => Self::bad_gateway(err.to_string()),
        }
    }
}

/// Map a reservation store failure to a response.
///
/// Use with `map_err` at `send`/`send_and_wait_for` call sites.
pub fn store_error(err: StoreError) -> AppError {
    match err {
        StoreError::Timeout => {
            AppError::gateway_timeout("Timed out waiting for the reservation to settle")
        },
        StoreError::ShutdownInProgress => AppError::unavailable("Server is shutting down"),
        StoreError::ShutdownTimeout(_) | StoreError::ChannelClosed => {
            AppError::internal("Reservation processing failed").with_source(anyhow::Error::new(err))
        },
    }
}
