//! Courtside booking HTTP server.
//!
//! Wires the Data API, payment platform and identity provider clients into
//! the reservation store, starts the reconciliation sweeper and serves the
//! HTTP API until SIGINT/SIGTERM.

use anyhow::Context;
use courtside_booking::{
    ApiSettings, AppState, Config, ReconciliationSweeper, ReservationEnvironment,
    ReservationReducer, ReservationState, ReservationStore, build_router,
    availability::AvailabilityAccessor,
    booking_writer::BookingWriter,
    data_api::{CourtDataApi, GraphQlDataApi},
    identity::{HttpIdentityProvider, IdentityProvider},
    intents::IntentLedger,
    metrics,
    payment_intents::PaymentIntentRequester,
    payments::{PaymentPlatform, StripeClient},
};
use courtside_core::environment::{Clock, SystemClock};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,courtside_booking=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Courtside booking server");

    // Load configuration
    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        data_api_url = %config.data_api.url,
        payments_api = %config.payments.api_base,
        identity_url = %config.identity.url,
        hold_ttl_secs = config.reservations.hold_ttl_secs,
        "Configuration loaded"
    );

    // Metrics exporter
    let metrics_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.metrics_port)
        .parse()
        .context("invalid metrics listen address")?;
    metrics::install_exporter(metrics_addr)?;

    // External systems
    let data_api: Arc<dyn CourtDataApi> = Arc::new(GraphQlDataApi::new(&config.data_api)?);
    let payments: Arc<dyn PaymentPlatform> = Arc::new(StripeClient::new(&config.payments)?);
    let identity: Arc<dyn IdentityProvider> = Arc::new(HttpIdentityProvider::new(&config.identity)?);
    info!("External clients initialized");

    // Reservation store
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ledger = IntentLedger::new(data_api.clone());
    let environment = ReservationEnvironment {
        availability: AvailabilityAccessor::new(data_api.clone()),
        payment_intents: PaymentIntentRequester::new(payments.clone()),
        bookings: BookingWriter::new(data_api.clone(), clock.clone()),
        ledger: ledger.clone(),
        clock: clock.clone(),
        hold_ttl: config.reservations.hold_ttl(),
        release_retry: config.reservations.release_retry(),
    };
    let store = ReservationStore::new(
        ReservationState::default(),
        ReservationReducer::new(),
        environment,
    );
    info!("Reservation store initialized");

    // Reconciliation sweeper
    let (sweeper, sweeper_shutdown) = ReconciliationSweeper::new(
        store.clone(),
        ledger,
        clock,
        config.reservations.sweep_interval(),
        config.reservations.settled_retention(),
    );
    let sweeper_handle = tokio::spawn(sweeper.run());

    // HTTP server
    let state = AppState::new(
        store.clone(),
        data_api,
        payments,
        identity,
        ApiSettings::from_config(&config),
    );
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(address = %addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped, draining reservations");

    if sweeper_shutdown.send(true).is_err() {
        warn!("Reconciliation sweeper already stopped");
    }
    if let Err(e) = sweeper_handle.await {
        error!(error = %e, "Reconciliation sweeper task failed");
    }

    match store
        .shutdown(Duration::from_secs(config.server.shutdown_timeout))
        .await
    {
        Ok(()) => info!("Reservation store drained"),
        Err(e) => warn!(error = %e, "Reservation store shutdown incomplete; the sweeper will resume open reservations"),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
