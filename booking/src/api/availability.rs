//! Availability endpoints.
//!
//! - GET  /api/tenants/:tenant_id/courts/:court_number/availability?date=YYYY-MM-DD
//! - POST /api/availability (tenant owner)

use crate::auth::{SessionUser, authorize_tenant};
use crate::server::state::AppState;
use crate::types::{Availability, TenantId};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{PathRejection, QueryRejection},
    },
    http::StatusCode,
};
use chrono::{DateTime, NaiveDate, Utc};
use courtside_web::{AppError, ValidJson};
use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing availability.
#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    /// Day to list (UTC)
    pub date: NaiveDate,
}

/// Slots of one court on one day.
#[derive(Debug, Serialize, Deserialize)]
pub struct AvailabilityResponse {
    /// Tenant
    pub tenant_id: TenantId,
    /// Court
    pub court_number: u32,
    /// Day listed
    pub date: NaiveDate,
    /// Slots ordered by start time
    pub slots: Vec<Availability>,
}

/// A slot range to publish.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SlotRange {
    /// Start
    pub start_time: DateTime<Utc>,
    /// End
    pub end_time: DateTime<Utc>,
}

/// Request to publish bookable slots.
#[derive(Debug, Deserialize)]
pub struct PublishAvailabilityRequest {
    /// Tenant
    pub tenant_id: TenantId,
    /// Court
    pub court_number: u32,
    /// Slots to open
    pub slots: Vec<SlotRange>,
}

/// Published slots.
#[derive(Debug, Serialize, Deserialize)]
pub struct PublishAvailabilityResponse {
    /// Slots created, all `available`
    pub slots: Vec<Availability>,
}

// ============================================================================
// Handlers
// ============================================================================

/// List the slots of a court for a day.
///
/// Public endpoint.
///
/// ```bash
/// curl "http://localhost:8080/api/tenants/550e8400-.../courts/1/availability?date=2025-06-01"
/// ```
///
/// # Errors
///
/// - 400 for a malformed tenant id, court number or date
/// - 404 if the tenant does not exist
/// - 502 if the Data API fails
pub async fn list_availability(
    State(state): State<AppState>,
    path: Result<Path<(TenantId, u32)>, PathRejection>,
    query: Result<Query<AvailabilityQuery>, QueryRejection>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let Path((tenant_id, court_number)) =
        path.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let Query(query) = query.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;

    if state.data_api.get_tenant(tenant_id).await?.is_none() {
        return Err(AppError::not_found("Tenant", tenant_id));
    }

    let slots = state
        .availability
        .list(tenant_id, court_number, query.date)
        .await?;

    Ok(Json(AvailabilityResponse {
        tenant_id,
        court_number,
        date: query.date,
        slots,
    }))
}

/// Publish bookable slots for a court.
///
/// Slots must not overlap each other or existing slots of the court.
///
/// # Errors
///
/// - 400 for empty, inverted or overlapping ranges
/// - 401/403 if the caller does not own the tenant
/// - 404 if the tenant or court does not exist
/// - 502 if the Data API fails
#[tracing::instrument(skip_all, fields(tenant_id = %request.tenant_id, court_number = request.court_number))]
pub async fn publish_availability(
    session: SessionUser,
    State(state): State<AppState>,
    ValidJson(request): ValidJson<PublishAvailabilityRequest>,
) -> Result<(StatusCode, Json<PublishAvailabilityResponse>), AppError> {
    let tenant = authorize_tenant(&state, &session.user, request.tenant_id).await?;

    if state
        .data_api
        .get_court(tenant.id, request.court_number)
        .await?
        .is_none()
    {
        return Err(AppError::not_found("Court", request.court_number));
    }

    let ranges: Vec<_> = request
        .slots
        .iter()
        .map(|r| (r.start_time, r.end_time))
        .collect();
    let slots = state
        .availability
        .publish(tenant.id, request.court_number, &ranges)
        .await?;

    tracing::info!(count = slots.len(), "Published availability");
    Ok((StatusCode::CREATED, Json(PublishAvailabilityResponse { slots })))
}
