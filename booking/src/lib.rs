//! # Courtside booking service
//!
//! Multi-tenant court booking backend. Facilities (tenants) publish court
//! availability and products; guests reserve a slot, pay through the
//! tenant's connected merchant account and confirm the booking.
//!
//! ## Architecture
//!
//! The reservation lifecycle is a saga ([`reservation`]) run by a
//! `courtside_runtime::Store`:
//!
//! ```text
//! ReserveSlot ─▶ IntentRecorded ─▶ SlotHeld ─▶ PaymentIntentCreated ─▶ PaymentRequested
//!                                      │                                    │
//!                                      ▼                                    ▼ (ConfirmBooking)
//!                               ReservationFailed     BookingRecorded ─▶ SlotBooked ─▶ BookingConfirmed
//! ```
//!
//! Each slot hold is stamped with the reservation that took it; releases and
//! bookings only succeed for that reservation.
//!
//! Every stage change is persisted as an intent record so a restarted
//! process (or the [`reconciliation`] sweeper) can finish what it started.
//! Holds that are never paid are released after their TTL.
//!
//! ## External systems
//!
//! - [`data_api`]: GraphQL Data API holding tenants, courts, availability,
//!   products, bookings and intent records
//! - [`payments`]: payment platform (Stripe Connect)
//! - [`identity`]: identity provider resolving bearer tokens
//!
//! All three sit behind traits; [`mocks`] provides in-memory versions.

pub mod api;
pub mod auth;
pub mod availability;
pub mod booking_writer;
pub mod config;
pub mod data_api;
pub mod error;
pub mod identity;
pub mod intents;
pub mod metrics;
pub mod mocks;
pub mod payment_intents;
pub mod payments;
pub mod pricing;
pub mod reconciliation;
pub mod reservation;
pub mod server;
pub mod types;

pub use config::Config;
pub use error::ReservationError;
pub use reconciliation::ReconciliationSweeper;
pub use reservation::{
    ReservationAction, ReservationEnvironment, ReservationReducer, ReservationState,
    ReservationStore,
};
pub use server::{ApiSettings, AppState, build_router};
