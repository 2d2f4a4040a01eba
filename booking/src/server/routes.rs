//! Router configuration.

use super::health::{health_check, readiness_check};
use super::state::AppState;
use crate::api::{availability, bookings, merchant, payments, products};
use axum::{
    Router,
    routing::{get, post},
};
use courtside_web::correlation_id_layer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the complete router.
///
/// - Health checks (no authentication)
/// - Merchant onboarding (tenant owner)
/// - Guest booking: payment intent, confirmation, availability
/// - Catalog management (tenant owner)
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Merchant onboarding
        .route("/stripe/connect-account", post(merchant::connect_account))
        .route("/stripe/account-status", post(merchant::account_status))
        .route("/stripe/account-session", post(merchant::account_session))
        // Guest booking
        .route(
            "/stripe/create-payment-intent",
            post(payments::create_payment_intent),
        )
        .route("/bookings/confirm", post(bookings::confirm_booking))
        .route(
            "/tenants/:tenant_id/courts/:court_number/availability",
            get(availability::list_availability),
        )
        // Catalog
        .route("/availability", post(availability::publish_availability))
        .route("/products", post(products::create_product));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api", api_routes)
        .with_state(state)
        .layer(correlation_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
