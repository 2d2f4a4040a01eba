//! Authentication and tenant authorization.
//!
//! ```rust,ignore
//! async fn connect_account(
//!     session: SessionUser,
//!     State(state): State<AppState>,
//!     ValidJson(request): ValidJson<TenantRequest>,
//! ) -> Result<Json<ConnectAccountResponse>, AppError> {
//!     let tenant = authorize_tenant(&state, &session.user, request.tenant_id).await?;
//!     ...
//! }
//! ```

use crate::server::state::AppState;
use crate::types::{AuthUser, Tenant, TenantId};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use courtside_web::{AppError, BearerToken};

/// An authenticated caller.
///
/// Resolves the bearer token through the identity provider; rejects with
/// 401 when the token is missing or unknown.
#[derive(Debug, Clone)]
pub struct SessionUser {
    /// The caller
    pub user: AuthUser,
}

#[async_trait]
impl FromRequestParts<AppState> for SessionUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;

        match state.identity.authenticate(&token).await {
            Ok(user) => {
                tracing::debug!(user_id = %user.id, "Authenticated request");
                Ok(Self { user })
            },
            Err(error) => {
                tracing::info!(%error, "Authentication failed");
                Err(error.into())
            },
        }
    }
}

/// Load a tenant and check the caller owns it.
///
/// # Errors
///
/// - 404 if the tenant does not exist
/// - 403 if the caller is not its owner
/// - 502 if the Data API fails
pub async fn authorize_tenant(
    state: &AppState,
    user: &AuthUser,
    tenant_id: TenantId,
) -> Result<Tenant, AppError> {
    let tenant = state
        .data_api
        .get_tenant(tenant_id)
        .await?
        .ok_or_else(|| AppError::not_found("Tenant", tenant_id))?;

    if tenant.owner_id != user.id {
        tracing::warn!(%tenant_id, user_id = %user.id, "Caller does not own tenant");
        return Err(AppError::forbidden("You do not manage this tenant"));
    }

    Ok(tenant)
}
