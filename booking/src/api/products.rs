//! Catalog endpoint (tenant owner only).
//!
//! - POST /api/products
//!
//! Products are created on the tenant's connected account first, then the
//! row is written with the platform ids.

use crate::auth::{SessionUser, authorize_tenant};
use crate::error::ReservationError;
use crate::payments::ProductRequest;
use crate::server::state::AppState;
use crate::types::{PricingModel, Product, ProductId, ProductKind, TenantId};
use axum::{Json, extract::State, http::StatusCode};
use courtside_web::{AppError, ValidJson};
use serde::Deserialize;

/// Request to create a product.
#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    /// Tenant
    pub tenant_id: TenantId,
    /// Display name
    pub name: String,
    /// Court or equipment
    pub kind: ProductKind,
    /// Hourly rate or flat price
    pub pricing: PricingModel,
}

impl CreateProductRequest {
    fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("product name is required"));
        }
        if self.pricing.unit_amount().is_zero() {
            return Err(AppError::validation("product price must be positive"));
        }
        Ok(())
    }
}

/// Create a product with a default price on the tenant's connected account.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/products \
///   -H "Authorization: Bearer <token>" \
///   -H "Content-Type: application/json" \
///   -d '{
///     "tenant_id": "550e8400-...",
///     "name": "Court rental",
///     "kind": "court",
///     "pricing": {"type": "hourly", "rate": 3000}
///   }'
/// ```
///
/// # Errors
///
/// - 400 for an empty name or a zero price
/// - 401/403 if the caller does not own the tenant
/// - 404 if the tenant does not exist
/// - 409 if the tenant has no connected account
/// - 502 if the Data API or the payment platform fails
#[tracing::instrument(skip_all, fields(tenant_id = %request.tenant_id))]
pub async fn create_product(
    session: SessionUser,
    State(state): State<AppState>,
    ValidJson(request): ValidJson<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>), AppError> {
    let tenant = authorize_tenant(&state, &session.user, request.tenant_id).await?;
    let account_id = tenant
        .stripe_account_id
        .ok_or(ReservationError::NotConnected)?;
    request.validate()?;

    let created = state
        .payments
        .create_product_with_price(ProductRequest {
            account_id,
            name: request.name.clone(),
            unit_amount: request.pricing.unit_amount(),
            currency: state.settings.currency.clone(),
        })
        .await?;

    let product = Product {
        id: ProductId::new(),
        tenant_id: tenant.id,
        name: request.name,
        kind: request.kind,
        pricing: request.pricing,
        stripe_product_id: Some(created.product_id),
        stripe_price_id: Some(created.price_id),
        active: true,
    };
    state.data_api.insert_product(&product).await?;

    tracing::info!(product_id = %product.id, "Product created");
    Ok((StatusCode::CREATED, Json(product)))
}
