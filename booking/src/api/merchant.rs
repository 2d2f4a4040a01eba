//! Merchant onboarding endpoints (tenant owner only).
//!
//! - POST /api/stripe/connect-account
//! - POST /api/stripe/account-status
//! - POST /api/stripe/account-session
//!
//! A tenant collects payments on its own connected account. Onboarding
//! creates that account once and hands the owner a hosted onboarding link
//! or an embedded-onboarding session.

use crate::auth::{SessionUser, authorize_tenant};
use crate::error::ReservationError;
use crate::payments::{ConnectedAccount, NewAccount};
use crate::server::state::AppState;
use crate::types::{Tenant, TenantId};
use axum::{Json, extract::State};
use courtside_web::{AppError, ValidJson};
use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request addressing one tenant.
#[derive(Debug, Deserialize)]
pub struct TenantRequest {
    /// Tenant
    pub tenant_id: TenantId,
}

/// Onboarding link for a connected account.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectAccountResponse {
    /// Connected account id
    pub account_id: String,
    /// Hosted onboarding URL
    pub url: String,
}

/// Onboarding state of the tenant's connected account.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountStatusResponse {
    /// Connected account id
    pub account_id: String,
    /// Can accept charges
    pub charges_enabled: bool,
    /// Can receive payouts
    pub payouts_enabled: bool,
    /// Onboarding details submitted
    pub details_submitted: bool,
    /// Requirements still due
    pub currently_due: Vec<String>,
}

impl From<ConnectedAccount> for AccountStatusResponse {
    fn from(account: ConnectedAccount) -> Self {
        Self {
            account_id: account.id,
            charges_enabled: account.charges_enabled,
            payouts_enabled: account.payouts_enabled,
            details_submitted: account.details_submitted,
            currently_due: account.currently_due,
        }
    }
}

/// Client secret for embedded onboarding.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountSessionResponse {
    /// Account session client secret
    pub client_secret: String,
}

fn connected_account(tenant: &Tenant) -> Result<&str, AppError> {
    tenant
        .stripe_account_id
        .as_deref()
        .ok_or_else(|| ReservationError::NotConnected.into())
}

// ============================================================================
// Handlers
// ============================================================================

/// Connect a merchant account and return an onboarding link.
///
/// Creates the account on first call and stores its id on the tenant; later
/// calls reuse it and only issue a fresh link.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/stripe/connect-account \
///   -H "Authorization: Bearer <token>" \
///   -H "Content-Type: application/json" \
///   -d '{"tenant_id": "550e8400-..."}'
/// ```
///
/// # Errors
///
/// - 401/403 if the caller does not own the tenant
/// - 404 if the tenant does not exist
/// - 502 if the Data API or the payment platform fails
#[tracing::instrument(skip_all, fields(tenant_id = %request.tenant_id))]
pub async fn connect_account(
    session: SessionUser,
    State(state): State<AppState>,
    ValidJson(request): ValidJson<TenantRequest>,
) -> Result<Json<ConnectAccountResponse>, AppError> {
    let tenant = authorize_tenant(&state, &session.user, request.tenant_id).await?;

    let account_id = if let Some(existing) = tenant.stripe_account_id {
        existing
    } else {
        let account = state
            .payments
            .create_account(NewAccount {
                email: tenant.email.clone().or(session.user.email),
                business_name: tenant.name.clone(),
                tenant_id: tenant.id.to_string(),
            })
            .await?;

        state
            .data_api
            .set_tenant_stripe_account(tenant.id, &account.id)
            .await?;
        tracing::info!(account_id = %account.id, "Connected account created");
        account.id
    };

    let url = state
        .payments
        .create_account_link(
            &account_id,
            &state.settings.connect_refresh_url,
            &state.settings.connect_return_url,
        )
        .await?;

    Ok(Json(ConnectAccountResponse { account_id, url }))
}

/// Onboarding state of the tenant's connected account.
///
/// # Errors
///
/// - 401/403 if the caller does not own the tenant
/// - 404 if the tenant does not exist
/// - 409 if no account is connected yet
/// - 502 if the Data API or the payment platform fails
pub async fn account_status(
    session: SessionUser,
    State(state): State<AppState>,
    ValidJson(request): ValidJson<TenantRequest>,
) -> Result<Json<AccountStatusResponse>, AppError> {
    let tenant = authorize_tenant(&state, &session.user, request.tenant_id).await?;
    let account = state
        .payments
        .retrieve_account(connected_account(&tenant)?)
        .await?;

    Ok(Json(account.into()))
}

/// Create an account session for embedded onboarding.
///
/// # Errors
///
/// - 401/403 if the caller does not own the tenant
/// - 404 if the tenant does not exist
/// - 409 if no account is connected yet
/// - 502 if the Data API or the payment platform fails
pub async fn account_session(
    session: SessionUser,
    State(state): State<AppState>,
    ValidJson(request): ValidJson<TenantRequest>,
) -> Result<Json<AccountSessionResponse>, AppError> {
    let tenant = authorize_tenant(&state, &session.user, request.tenant_id).await?;
    let client_secret = state
        .payments
        .create_account_session(connected_account(&tenant)?)
        .await?;

    Ok(Json(AccountSessionResponse { client_secret }))
}
