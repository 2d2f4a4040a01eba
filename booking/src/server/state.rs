//! Application state for the booking HTTP server.
//!
//! Contains the shared resources handlers need:
//! - The reservation store (saga)
//! - Clients for the Data API, the payment platform and the identity provider
//! - Accessors built over them

use crate::availability::AvailabilityAccessor;
use crate::config::Config;
use crate::data_api::CourtDataApi;
use crate::identity::IdentityProvider;
use crate::intents::IntentLedger;
use crate::payments::PaymentPlatform;
use crate::reservation::ReservationStore;
use std::sync::Arc;
use std::time::Duration;

/// Request-independent settings handlers read
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Lowercase ISO currency for quotes and prices
    pub currency: String,
    /// Onboarding refresh URL
    pub connect_refresh_url: String,
    /// Onboarding return URL
    pub connect_return_url: String,
    /// How long a handler waits for the saga to answer
    pub response_timeout: Duration,
}

impl ApiSettings {
    /// Settings from the service configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            currency: config.payments.currency.clone(),
            connect_refresh_url: config.payments.connect_refresh_url.clone(),
            connect_return_url: config.payments.connect_return_url.clone(),
            response_timeout: config.reservations.response_timeout(),
        }
    }
}

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; every field is a cheap handle.
#[derive(Clone)]
pub struct AppState {
    /// Reservation saga
    pub store: ReservationStore,
    /// Data API
    pub data_api: Arc<dyn CourtDataApi>,
    /// Payment platform
    pub payments: Arc<dyn PaymentPlatform>,
    /// Identity provider
    pub identity: Arc<dyn IdentityProvider>,
    /// Reservation intent records
    pub ledger: IntentLedger,
    /// Availability rows
    pub availability: AvailabilityAccessor,
    /// Handler settings
    pub settings: Arc<ApiSettings>,
}

impl AppState {
    /// Create the application state.
    #[must_use]
    pub fn new(
        store: ReservationStore,
        data_api: Arc<dyn CourtDataApi>,
        payments: Arc<dyn PaymentPlatform>,
        identity: Arc<dyn IdentityProvider>,
        settings: ApiSettings,
    ) -> Self {
        Self {
            store,
            ledger: IntentLedger::new(data_api.clone()),
            availability: AvailabilityAccessor::new(data_api.clone()),
            data_api,
            payments,
            identity,
            settings: Arc::new(settings),
        }
    }
}
