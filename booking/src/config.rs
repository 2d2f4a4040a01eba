//! Configuration management for the booking service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Secrets for the Data API, the payment platform and the identity provider
//! have no defaults; missing ones are reported as [`ConfigError`].

use courtside_runtime::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set (or is empty)
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set but cannot be parsed
    #[error("invalid value for {name}: {value}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Offending value
        value: String,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Data API (GraphQL) configuration
    pub data_api: DataApiConfig,
    /// Payment platform configuration
    pub payments: PaymentsConfig,
    /// Identity provider configuration
    pub identity: IdentityConfig,
    /// Reservation workflow timings
    pub reservations: ReservationConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Metrics server port (Prometheus scraping)
    pub metrics_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// Data API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataApiConfig {
    /// GraphQL endpoint, e.g. `https://<project>.supabase.co/graphql/v1`
    pub url: String,
    /// Service API key, sent as `apikey` and bearer token
    pub api_key: String,
    /// Request timeout in seconds
    pub timeout: u64,
}

/// Payment platform configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsConfig {
    /// Platform secret key
    pub secret_key: String,
    /// REST API base URL
    pub api_base: String,
    /// ISO currency for payment intents and prices (lowercase)
    pub currency: String,
    /// Where onboarding sends the merchant when a link expires
    pub connect_refresh_url: String,
    /// Where onboarding sends the merchant when done
    pub connect_return_url: String,
    /// Request timeout in seconds
    pub timeout: u64,
}

/// Identity provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Auth API base URL; `GET {url}/user` resolves a bearer token
    pub url: String,
    /// Public API key sent as `apikey`
    pub api_key: String,
    /// Request timeout in seconds; token checks sit on the request path
    pub timeout: u64,
}

/// Reservation workflow timings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationConfig {
    /// How long a held slot stays held without confirmation, in seconds
    pub hold_ttl_secs: u64,
    /// Interval between reconciliation sweeps, in seconds
    pub sweep_interval_secs: u64,
    /// How long a handler waits for the reservation outcome, in seconds
    pub response_timeout_secs: u64,
    /// How long settled reservations stay in memory, in seconds
    pub settled_retention_secs: u64,
    /// Retries for a failed slot release before reconciliation takes over
    pub release_retries: usize,
}

impl ReservationConfig {
    /// Hold TTL as a `Duration`
    #[must_use]
    pub const fn hold_ttl(&self) -> Duration {
        Duration::from_secs(self.hold_ttl_secs)
    }

    /// Sweep interval as a `Duration`
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Response timeout as a `Duration`
    #[must_use]
    pub const fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    /// Settled retention as a `Duration`
    #[must_use]
    pub const fn settled_retention(&self) -> Duration {
        Duration::from_secs(self.settled_retention_secs)
    }

    /// Backoff for slot releases.
    ///
    /// Jittered so releases that failed together do not retry together.
    #[must_use]
    pub fn release_retry(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.release_retries)
            .initial_delay(Duration::from_millis(200))
            .max_delay(Duration::from_secs(5))
            .jitter(true)
            .build()
    }
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            hold_ttl_secs: 600,
            sweep_interval_secs: 60,
            response_timeout_secs: 30,
            settled_retention_secs: 3600,
            release_retries: 3,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Reads a `.env` file first if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or a value
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a required variable is missing or a value
    /// cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(&lookup);
        let defaults = ReservationConfig::default();

        Ok(Self {
            server: ServerConfig {
                host: vars.string_or("HOST", "0.0.0.0"),
                port: vars.parse_or("PORT", 8080)?,
                metrics_port: vars.parse_or("METRICS_PORT", 9090)?,
                shutdown_timeout: vars.parse_or("SHUTDOWN_TIMEOUT", 30)?,
            },
            data_api: DataApiConfig {
                url: vars.required("DATA_API_URL")?,
                api_key: vars.required("DATA_API_KEY")?,
                timeout: vars.parse_or("DATA_API_TIMEOUT", 10)?,
            },
            payments: PaymentsConfig {
                secret_key: vars.required("STRIPE_SECRET_KEY")?,
                api_base: vars.string_or("STRIPE_API_BASE", "https://api.stripe.com"),
                currency: vars.string_or("PAYMENT_CURRENCY", "usd").to_lowercase(),
                connect_refresh_url: vars.string_or(
                    "CONNECT_REFRESH_URL",
                    "http://localhost:3000/dashboard/payments?refresh=true",
                ),
                connect_return_url: vars.string_or(
                    "CONNECT_RETURN_URL",
                    "http://localhost:3000/dashboard/payments?success=true",
                ),
                timeout: vars.parse_or("STRIPE_TIMEOUT", 20)?,
            },
            identity: IdentityConfig {
                url: vars.required("IDENTITY_URL")?,
                api_key: vars.string_or("IDENTITY_API_KEY", ""),
                timeout: vars.parse_or("IDENTITY_TIMEOUT", 5)?,
            },
            reservations: ReservationConfig {
                hold_ttl_secs: vars.parse_or("HOLD_TTL_SECS", defaults.hold_ttl_secs)?,
                sweep_interval_secs: vars
                    .parse_or("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
                response_timeout_secs: vars
                    .parse_or("RESPONSE_TIMEOUT_SECS", defaults.response_timeout_secs)?,
                settled_retention_secs: vars
                    .parse_or("SETTLED_RETENTION_SECS", defaults.settled_retention_secs)?,
                release_retries: vars.parse_or("RELEASE_MAX_RETRIES", defaults.release_retries)?,
            },
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F> Vars<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn string_or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T: std::str::FromStr>(
        &self,
        name: &'static str,
        default: T,
    ) -> Result<T, ConfigError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("DATA_API_URL", "https://db.example.test/graphql/v1"),
        ("DATA_API_KEY", "service-key"),
        ("STRIPE_SECRET_KEY", "sk_test_123"),
        ("IDENTITY_URL", "https://db.example.test/auth/v1"),
    ];

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_lookup(lookup(REQUIRED)).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.payments.currency, "usd");
        assert_eq!(config.payments.api_base, "https://api.stripe.com");
        assert_eq!(config.reservations.hold_ttl(), Duration::from_secs(600));
        assert_eq!(config.reservations.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.reservations.response_timeout(), Duration::from_secs(30));
        assert_eq!(config.identity.timeout, 5);
    }

    #[test]
    fn test_identity_timeout_is_separate_from_data_api() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("DATA_API_TIMEOUT", "30"), ("IDENTITY_TIMEOUT", "2")]);

        let config = Config::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(config.data_api.timeout, 30);
        assert_eq!(config.identity.timeout, 2);
    }

    #[test]
    fn test_release_retry_is_jittered() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("RELEASE_MAX_RETRIES", "5"));

        let policy = Config::from_lookup(lookup(&pairs))
            .unwrap()
            .reservations
            .release_retry();

        assert!(policy.jitter);
        assert_eq!(policy.max_retries, 5);
        for attempt in 0..5 {
            assert!(policy.delay_for_attempt(attempt) <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_overrides_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("PORT", "3001"), ("HOLD_TTL_SECS", "120"), ("PAYMENT_CURRENCY", "EUR")]);

        let config = Config::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(config.server.port, 3001);
        assert_eq!(config.reservations.hold_ttl_secs, 120);
        assert_eq!(config.payments.currency, "eur");
    }

    #[test]
    fn test_missing_secret_is_error() {
        let pairs: Vec<_> = REQUIRED
            .iter()
            .copied()
            .filter(|(k, _)| *k != "STRIPE_SECRET_KEY")
            .collect();

        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert_eq!(err, ConfigError::Missing("STRIPE_SECRET_KEY"));
    }

    #[test]
    fn test_blank_required_value_counts_as_missing() {
        let mut pairs = REQUIRED.to_vec();
        pairs.retain(|(k, _)| *k != "DATA_API_KEY");
        pairs.push(("DATA_API_KEY", "  "));

        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATA_API_KEY"));
    }

    #[test]
    fn test_unparseable_number_is_error() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PORT", "eighty"));

        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "PORT", .. }));
    }
}
