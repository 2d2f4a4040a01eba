//! Identity provider: resolves bearer tokens to users.

use crate::config::IdentityConfig;
use crate::types::{AuthUser, UserId};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while authenticating a caller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The token is missing, expired or unknown
    #[error("invalid or expired token")]
    Unauthenticated,

    /// The identity provider could not be reached or answered unexpectedly
    #[error("identity provider error: {0}")]
    Upstream(String),
}

/// Resolves a bearer token to the user it was issued to
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Authenticate a bearer token
    async fn authenticate(&self, token: &str) -> Result<AuthUser, IdentityError>;
}

/// Identity provider reached over HTTP (`GET {url}/user`)
#[derive(Clone)]
pub struct HttpIdentityProvider {
    client: Client,
    url: String,
    api_key: String,
}

impl std::fmt::Debug for HttpIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIdentityProvider")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct UserObject {
    id: UserId,
    email: Option<String>,
}

impl HttpIdentityProvider {
    /// Create a provider for the configured auth endpoint
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Upstream`] if the HTTP client cannot be built.
    pub fn new(config: &IdentityConfig) -> Result<Self, IdentityError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| IdentityError::Upstream(e.to_string()))?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    #[tracing::instrument(skip_all)]
    async fn authenticate(&self, token: &str) -> Result<AuthUser, IdentityError> {
        let mut request = self
            .client
            .get(format!("{}/user", self.url))
            .bearer_auth(token);
        if !self.api_key.is_empty() {
            request = request.header("apikey", &self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| IdentityError::Upstream(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let user: UserObject = response
                    .json()
                    .await
                    .map_err(|e| IdentityError::Upstream(e.to_string()))?;
                Ok(AuthUser {
                    id: user.id,
                    email: user.email,
                })
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(IdentityError::Unauthenticated),
            status => {
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(%status, body = %body, "Identity provider returned an error");
                Err(IdentityError::Upstream(format!("status {status}")))
            },
        }
    }
}
