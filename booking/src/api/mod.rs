//! HTTP handlers.
//!
//! Guest endpoints (payment, confirmation, availability listing) are public;
//! merchant and catalog endpoints require the tenant owner's bearer token.

pub mod availability;
pub mod bookings;
pub mod merchant;
pub mod payments;
pub mod products;
