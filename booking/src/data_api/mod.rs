//! Access to the hosted database through its GraphQL Data API.
//!
//! [`CourtDataApi`] is the seam the rest of the service talks to. The
//! production implementation is [`GraphQlDataApi`]; tests use
//! [`InMemoryDataApi`](crate::mocks::InMemoryDataApi).
//!
//! Every query is scoped to a tenant. Status changes on availability rows
//! are conditional single-row updates: the caller names the status it
//! expects and receives the number of rows that matched.

use crate::types::{
    Availability, AvailabilityStatus, Booking, BookingId, Court, Product, ProductId, Reservation,
    ReservationId, SlotKey, Tenant, TenantId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

mod graphql;

pub use graphql::GraphQlDataApi;

/// Errors returned by the Data API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataApiError {
    /// The request never produced a response (connect, timeout, TLS)
    #[error("data API transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status
    #[error("data API returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// The response carried GraphQL errors
    #[error("data API query failed: {0}")]
    GraphQl(String),

    /// The response could not be decoded
    #[error("data API response could not be decoded: {0}")]
    Decode(String),
}

/// Operations the booking service needs from the Data API
#[async_trait]
pub trait CourtDataApi: Send + Sync {
    // --- tenants ---

    /// Load a tenant
    async fn get_tenant(&self, tenant_id: TenantId) -> Result<Option<Tenant>, DataApiError>;

    /// Store the connected merchant account of a tenant
    async fn set_tenant_stripe_account(
        &self,
        tenant_id: TenantId,
        account_id: &str,
    ) -> Result<(), DataApiError>;

    // --- courts ---

    /// Load a court
    async fn get_court(
        &self,
        tenant_id: TenantId,
        court_number: u32,
    ) -> Result<Option<Court>, DataApiError>;

    // --- availability ---

    /// Move a slot from `expected` to `new`, returning the number of rows
    /// that matched `(tenant, court, start, expected)`.
    ///
    /// Holding stamps the row with `holder`. Leaving `held` additionally
    /// requires the row to be held by `holder`; moving back to `available`
    /// clears it.
    async fn update_availability_status(
        &self,
        slot: &SlotKey,
        expected: AvailabilityStatus,
        new: AvailabilityStatus,
        holder: ReservationId,
    ) -> Result<u64, DataApiError>;

    /// Load one slot
    async fn get_availability(&self, slot: &SlotKey) -> Result<Option<Availability>, DataApiError>;

    /// Slots of a court starting in `[from, to)`, ordered by start time
    async fn list_availability(
        &self,
        tenant_id: TenantId,
        court_number: u32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Availability>, DataApiError>;

    /// Insert new slots
    async fn insert_availability(&self, slots: &[Availability]) -> Result<(), DataApiError>;

    // --- bookings ---

    /// Load a booking
    async fn get_booking(
        &self,
        tenant_id: TenantId,
        booking_id: BookingId,
    ) -> Result<Option<Booking>, DataApiError>;

    /// Insert a booking row
    async fn insert_booking(&self, booking: &Booking) -> Result<(), DataApiError>;

    // --- products ---

    /// Products of a tenant with the given ids (missing ids are skipped)
    async fn list_products(
        &self,
        tenant_id: TenantId,
        ids: &[ProductId],
    ) -> Result<Vec<Product>, DataApiError>;

    /// Insert a product row
    async fn insert_product(&self, product: &Product) -> Result<(), DataApiError>;

    // --- reservation intents ---

    /// Insert a reservation intent record
    async fn insert_reservation(&self, reservation: &Reservation) -> Result<(), DataApiError>;

    /// Overwrite a reservation intent record
    async fn update_reservation(&self, reservation: &Reservation) -> Result<(), DataApiError>;

    /// Load a reservation intent record
    async fn get_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, DataApiError>;

    /// Open (non-terminal) reservation intents that expired before `before`
    async fn list_stale_reservations(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, DataApiError>;

    // --- health ---

    /// Check that the Data API answers
    async fn ping(&self) -> Result<(), DataApiError>;
}
