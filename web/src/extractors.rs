//! Custom Axum extractors.
//!
//! - `CorrelationId`: Extract or generate request correlation IDs
//! - `BearerToken`: The token from an `Authorization: Bearer <token>` header
//! - `ValidJson`: A JSON body whose rejections render as [`AppError`]s
//!
//! # Examples
//!
//! ```ignore
//! use courtside_web::extractors::{BearerToken, CorrelationId, ValidJson};
//!
//! async fn handler(
//!     correlation_id: CorrelationId,
//!     token: BearerToken,
//!     ValidJson(request): ValidJson<ConnectAccountRequest>,
//! ) -> Result<Json<ConnectAccountResponse>, AppError> {
//!     tracing::info!(correlation_id = %correlation_id.0, "Processing request");
//!     ...
//! }
//! ```

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Request, rejection::JsonRejection},
    http::{header::AUTHORIZATION, request::Parts},
};
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Correlation ID for request tracing.
///
/// Uses the ID stored by the correlation middleware if present, then the
/// `X-Correlation-ID` header, and finally generates a new UUID v4.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Uuid>() {
            return Ok(Self(*id));
        }

        let correlation_id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// Bearer token extracted from `Authorization: Bearer <token>` header.
///
/// Rejects with 401 when the header is missing or malformed.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AppError::unauthorized("Invalid authorization format. Expected 'Bearer <token>'")
            })?;

        Ok(Self(token.to_string()))
    }
}

/// JSON body extractor that rejects with a 400 [`AppError`].
///
/// Axum's own `Json` rejects malformed bodies with 415/422 and a plain-text
/// body; handlers here answer every malformed request with a JSON 400.
#[derive(Debug, Clone)]
pub struct ValidJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(&rejection)),
        }
    }
}

fn json_rejection(rejection: &JsonRejection) -> AppError {
    match rejection {
        JsonRejection::JsonDataError(e) => AppError::validation(e.body_text()),
        JsonRejection::MissingJsonContentType(_) => {
            AppError::bad_request("Expected request with `Content-Type: application/json`")
        },
        other => AppError::bad_request(other.body_text()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct ConfirmRequest {
        booking_id: String,
    }

    #[tokio::test]
    async fn test_correlation_id_from_header() {
        let uuid = Uuid::new_v4();
        let req = HttpRequest::builder()
            .header(CORRELATION_ID_HEADER, uuid.to_string())
            .body(())
            .expect("Valid request");

        let (mut parts, ()) = req.into_parts();
        let correlation_id = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_eq!(correlation_id.0, uuid);
    }

    #[tokio::test]
    async fn test_correlation_id_prefers_extension() {
        let stored = Uuid::new_v4();
        let req = HttpRequest::builder()
            .header(CORRELATION_ID_HEADER, Uuid::new_v4().to_string())
            .body(())
            .unwrap();

        let (mut parts, ()) = req.into_parts();
        parts.extensions.insert(stored);
        let correlation_id = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .unwrap();

        assert_eq!(correlation_id.0, stored);
    }

    #[tokio::test]
    async fn test_bearer_token_extracted() {
        let req = HttpRequest::builder()
            .header(AUTHORIZATION, "Bearer abc.def")
            .body(())
            .unwrap();

        let (mut parts, ()) = req.into_parts();
        let token = BearerToken::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(token.0, "abc.def");
    }

    #[tokio::test]
    async fn test_bearer_token_missing_or_malformed() {
        for header in [None, Some("Basic dXNlcg=="), Some("Bearer ")] {
            let mut builder = HttpRequest::builder();
            if let Some(value) = header {
                builder = builder.header(AUTHORIZATION, value);
            }
            let (mut parts, ()) = builder.body(()).unwrap().into_parts();

            let err = BearerToken::from_request_parts(&mut parts, &())
                .await
                .unwrap_err();
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn test_valid_json_accepts_body() {
        let req = HttpRequest::builder()
            .header("content-type", "application/json")
            .body(Body::from(r#"{"booking_id":"b-1"}"#))
            .unwrap();

        let ValidJson(body) = ValidJson::<ConfirmRequest>::from_request(req, &())
            .await
            .unwrap();
        assert_eq!(body.booking_id, "b-1");
    }

    #[tokio::test]
    async fn test_valid_json_missing_field_is_400() {
        let req = HttpRequest::builder()
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();

        let err = ValidJson::<ConfirmRequest>::from_request(req, &())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_valid_json_syntax_error_is_400() {
        let req = HttpRequest::builder()
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let err = ValidJson::<ConfirmRequest>::from_request(req, &())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "BAD_REQUEST");
    }
}
