//! Axum integration for Courtside.
//!
//! The HTTP layer is the imperative shell around the reservation reducer:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Imperative Shell (Axum)         │  ← HTTP, JSON, bearer tokens
//! │  - Request parsing and validation       │  ← Correlation IDs, tracing
//! │  - Response serialization               │
//! ├─────────────────────────────────────────┤
//! │         Functional Core                 │
//! │  - Reservation saga (reducer)           │  ← No I/O, no side effects
//! │  - Effect descriptions (values)         │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Request Flow
//!
//! 1. **Extract** JSON body, bearer token and correlation ID
//! 2. **Build** an action from the request
//! 3. **Dispatch** it through the `Store` and wait for its outcome
//! 4. **Map** the outcome (or an [`AppError`]) to an HTTP response

#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod middleware;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{BearerToken, CorrelationId, ValidJson};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
