//! Business metrics for the booking service.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `courtside_reservations_total{outcome}` - Reservations by outcome
//!   (`payment_requested`, or the error code they failed with)
//! - `courtside_holds_released_total{cause}` - Holds released by cause
//!   (`payment_intent_failed`, `expired`)
//! - `courtside_bookings_confirmed_total` - Bookings confirmed
//! - `courtside_sweeps_total` - Reconciliation sweeps run
//!
//! ## Histograms
//! - `courtside_payment_intent_amount_cents` - Amount of created payment intents
//!
//! Store metrics (`store.*`) and retry metrics (`retry.*`) are recorded by
//! `courtside-runtime` and exported through the same recorder.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors raised while starting the metrics exporter
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Exporter configuration rejected
    #[error("failed to build metrics exporter: {0}")]
    Build(String),

    /// Exporter could not be installed or could not bind
    #[error("failed to install metrics exporter: {0}")]
    Install(String),
}

/// Register descriptions for all business metrics.
///
/// Called once at startup, before any metric is recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "courtside_reservations_total",
        "Reservations by outcome (payment_requested or failure code)"
    );
    describe_counter!(
        "courtside_holds_released_total",
        "Slot holds released, by cause (payment_intent_failed, expired)"
    );
    describe_counter!(
        "courtside_bookings_confirmed_total",
        "Bookings confirmed (booking written and slot booked)"
    );
    describe_counter!(
        "courtside_sweeps_total",
        "Reconciliation sweeps run"
    );
    describe_histogram!(
        "courtside_payment_intent_amount_cents",
        "Amount of created payment intents in cents"
    );

    describe_counter!("store.actions.total", "Actions processed by the store");
    describe_histogram!(
        "store.reducer.duration_seconds",
        "Time spent in the reducer per action"
    );
    describe_counter!("store.effects.executed", "Effects executed, by type");

    tracing::info!("Business metrics registered");
}

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// A recorder installed earlier (tests) is left in place.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be configured or bound.
pub fn install_exporter(addr: SocketAddr) -> Result<(), MetricsError> {
    register_business_metrics();

    let builder = PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .set_buckets_for_metric(
            Matcher::Full("courtside_payment_intent_amount_cents".to_string()),
            &[500.0, 1000.0, 2500.0, 5000.0, 7500.0, 10_000.0, 20_000.0, 50_000.0],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?;

    match builder.install() {
        Ok(()) => {
            tracing::info!(%addr, "Metrics available at http://{addr}/metrics");
            Ok(())
        },
        Err(e) => {
            let message = e.to_string();
            if message.contains("already") {
                tracing::warn!("Metrics recorder already installed, skipping");
                Ok(())
            } else {
                Err(MetricsError::Install(message))
            }
        },
    }
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record a reservation that reached payment
#[allow(clippy::cast_precision_loss)]
pub fn record_payment_requested(amount_cents: u64) {
    metrics::counter!("courtside_reservations_total", "outcome" => "payment_requested")
        .increment(1);
    metrics::histogram!("courtside_payment_intent_amount_cents").record(amount_cents as f64);
    tracing::debug!(amount_cents, "Recorded payment_requested metric");
}

/// Record a failed reservation or confirmation
pub fn record_reservation_failed(code: &'static str) {
    metrics::counter!("courtside_reservations_total", "outcome" => code).increment(1);
    tracing::debug!(code, "Recorded reservation_failed metric");
}

/// Record a released hold
pub fn record_hold_released(cause: &'static str) {
    metrics::counter!("courtside_holds_released_total", "cause" => cause).increment(1);
    tracing::debug!(cause, "Recorded hold_released metric");
}

/// Record a confirmed booking
pub fn record_booking_confirmed() {
    metrics::counter!("courtside_bookings_confirmed_total").increment(1);
    tracing::debug!("Recorded booking_confirmed metric");
}

/// Record a reconciliation sweep
pub fn record_sweep() {
    metrics::counter!("courtside_sweeps_total").increment(1);
}
