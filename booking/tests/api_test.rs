//! HTTP API tests.
//!
//! Exercise the router with in-memory platforms behind it: status codes,
//! error bodies, authorization and the guest booking flow.
//!
//! Run with: `cargo test -p courtside-booking --test api_test`

#![allow(clippy::expect_used, clippy::unwrap_used)]

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
};
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use courtside_booking::mocks::{
    InMemoryDataApi, MockPaymentPlatform, StaticIdentityProvider, sample_tenant, test_environment,
};
use courtside_booking::types::{
    AuthUser, Availability, AvailabilityStatus, Court, Money, PricingModel, Product, ProductId,
    ProductKind, ReservationId, ReservationStage, SlotKey, Tenant, TenantId, UserId,
};
use courtside_booking::{
    ApiSettings, AppState, ReservationReducer, ReservationState, ReservationStore, build_router,
};
use courtside_testing::mocks::ManualClock;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const OWNER_TOKEN: &str = "owner-token";
const STRANGER_TOKEN: &str = "stranger-token";

struct TestApp {
    router: Router,
    api: Arc<InMemoryDataApi>,
    platform: Arc<MockPaymentPlatform>,
    tenant: Tenant,
    product: Product,
    slot: SlotKey,
}

impl TestApp {
    fn new() -> Self {
        let api = Arc::new(InMemoryDataApi::new());
        let platform = Arc::new(MockPaymentPlatform::new());
        let clock = Arc::new(ManualClock::default());

        let owner = AuthUser {
            id: UserId::new(),
            email: Some("owner@example.test".to_string()),
        };
        let stranger = AuthUser {
            id: UserId::new(),
            email: None,
        };
        let identity = Arc::new(
            StaticIdentityProvider::new()
                .with_user(OWNER_TOKEN, owner.clone())
                .with_user(STRANGER_TOKEN, stranger),
        );

        let tenant = sample_tenant(owner.id);
        api.seed_tenant(tenant.clone());
        api.seed_court(Court {
            tenant_id: tenant.id,
            court_number: 1,
            name: "Center court".to_string(),
        });

        let start_time = Utc.with_ymd_and_hms(2025, 6, 1, 18, 0, 0).unwrap();
        api.seed_availability(Availability {
            tenant_id: tenant.id,
            court_number: 1,
            start_time,
            end_time: start_time + ChronoDuration::minutes(90),
            status: AvailabilityStatus::Available,
            held_by: None,
        });

        let product = Product {
            id: ProductId::new(),
            tenant_id: tenant.id,
            name: "Court rental".to_string(),
            kind: ProductKind::Court,
            pricing: PricingModel::Hourly {
                rate: Money::from_cents(3000),
            },
            stripe_product_id: None,
            stripe_price_id: None,
            active: true,
        };
        api.seed_product(product.clone());

        let env = test_environment(api.clone(), platform.clone(), clock);
        let store =
            ReservationStore::new(ReservationState::default(), ReservationReducer::new(), env);
        let settings = ApiSettings {
            currency: "usd".to_string(),
            connect_refresh_url: "https://app.example.test/connect/refresh".to_string(),
            connect_return_url: "https://app.example.test/connect/done".to_string(),
            response_timeout: Duration::from_secs(5),
        };
        let state = AppState::new(store, api.clone(), platform.clone(), identity, settings);

        Self {
            router: build_router(state),
            api,
            platform,
            product,
            slot: SlotKey {
                tenant_id: tenant.id,
                court_number: 1,
                start_time,
            },
            tenant,
        }
    }

    async fn request(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, token, Some(body)).await
    }

    fn payment_request(&self) -> Value {
        json!({
            "tenant_id": self.tenant.id,
            "court_number": 1,
            "start_time": self.slot.start_time,
            "end_time": self.slot.start_time + ChronoDuration::minutes(90),
            "products": [{"product_id": self.product.id}],
            "guest": {"name": "Ada Guest", "email": "ada@example.test"}
        })
    }
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_and_readiness() {
    let app = TestApp::new();

    let (status, body) = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = app.request(Method::GET, "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);

    app.api.fail_next("ping");
    let (status, body) = app.request(Method::GET, "/ready", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], false);
}

// ============================================================================
// Guest flow
// ============================================================================

#[tokio::test]
async fn test_guest_books_and_confirms() {
    let app = TestApp::new();

    let (status, created) = app
        .post("/api/stripe/create-payment-intent", None, app.payment_request())
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["amount"], 4500);
    assert_eq!(created["currency"], "usd");
    assert!(created["client_secret"].as_str().unwrap().ends_with("_secret"));
    assert_eq!(app.api.availability_status(&app.slot), Some(AvailabilityStatus::Held));

    let (status, confirmed) = app
        .post(
            "/api/bookings/confirm",
            None,
            json!({
                "tenant_id": app.tenant.id,
                "reservation_id": created["reservation_id"],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{confirmed}");
    assert_eq!(confirmed["status"], "confirmed");
    assert_eq!(confirmed["payment_status"], "pending");
    assert_eq!(app.api.availability_status(&app.slot), Some(AvailabilityStatus::Booked));
    assert_eq!(app.api.bookings().len(), 1);
}

#[tokio::test]
async fn test_end_time_must_match_published_slot() {
    let app = TestApp::new();
    let mut request = app.payment_request();
    request["end_time"] = json!(app.slot.start_time + ChronoDuration::minutes(1));

    let (status, body) = app
        .post("/api/stripe/create-payment-intent", None, request)
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(app.platform.intent_count(), 0);
    assert_eq!(app.api.availability_status(&app.slot), Some(AvailabilityStatus::Available));
}

#[tokio::test]
async fn test_payment_intent_for_unpublished_slot_is_not_found() {
    let app = TestApp::new();
    let mut request = app.payment_request();
    let start = app.slot.start_time + ChronoDuration::hours(3);
    request["start_time"] = json!(start);
    request["end_time"] = json!(start + ChronoDuration::minutes(90));

    let (status, body) = app
        .post("/api/stripe/create-payment-intent", None, request)
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND, "{body}");
    assert_eq!(app.platform.intent_count(), 0);
}

#[tokio::test]
async fn test_slot_update_failure_is_accepted_then_confirmed() {
    let app = TestApp::new();
    let (_, created) = app
        .post("/api/stripe/create-payment-intent", None, app.payment_request())
        .await;
    let confirm = json!({
        "tenant_id": app.tenant.id,
        "reservation_id": created["reservation_id"],
    });
    let reservation_id: ReservationId =
        serde_json::from_value(created["reservation_id"].clone()).unwrap();
    app.api.fail_next("update_availability_status");

    let (status, pending) = app.post("/api/bookings/confirm", None, confirm.clone()).await;

    assert_eq!(status, StatusCode::ACCEPTED, "{pending}");
    assert_eq!(pending["status"], "pending_confirmation");
    assert_eq!(app.api.availability_status(&app.slot), Some(AvailabilityStatus::Held));
    assert_eq!(app.api.bookings().len(), 1);

    let (status, confirmed) = app.post("/api/bookings/confirm", None, confirm).await;

    assert_eq!(status, StatusCode::OK, "{confirmed}");
    assert_eq!(confirmed["status"], "confirmed");
    assert_eq!(confirmed["booking_id"], pending["booking_id"]);
    assert_eq!(app.api.availability_status(&app.slot), Some(AvailabilityStatus::Booked));
    assert_eq!(app.api.bookings().len(), 1);
    assert_eq!(
        app.api.reservation(reservation_id).unwrap().stage,
        ReservationStage::Confirmed
    );
}

#[tokio::test]
async fn test_second_guest_gets_conflict() {
    let app = TestApp::new();

    let (first, _) = app
        .post("/api/stripe/create-payment-intent", None, app.payment_request())
        .await;
    let (second, body) = app
        .post("/api/stripe/create-payment-intent", None, app.payment_request())
        .await;

    assert_eq!(first, StatusCode::CREATED);
    assert_eq!(second, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SLOT_UNAVAILABLE");
    assert_eq!(app.platform.intent_count(), 1);
}

#[tokio::test]
async fn test_payment_intent_missing_fields_is_bad_request() {
    let app = TestApp::new();

    let (status, body) = app
        .post(
            "/api/stripe/create-payment-intent",
            None,
            json!({"tenant_id": app.tenant.id}),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert!(body["code"].is_string());
}

#[tokio::test]
async fn test_payment_intent_invalid_guest_is_bad_request() {
    let app = TestApp::new();
    let mut request = app.payment_request();
    request["guest"]["email"] = json!("not-an-email");

    let (status, body) = app
        .post("/api/stripe/create-payment-intent", None, request)
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_payment_intent_for_unknown_tenant_is_not_found() {
    let app = TestApp::new();
    let mut request = app.payment_request();
    request["tenant_id"] = json!(TenantId::new());

    let (status, body) = app
        .post("/api/stripe/create-payment-intent", None, request)
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_payment_platform_failure_is_bad_gateway_and_frees_slot() {
    let app = TestApp::new();
    app.platform.fail_next("create_payment_intent");

    let (status, body) = app
        .post("/api/stripe/create-payment-intent", None, app.payment_request())
        .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY, "{body}");
    assert_eq!(app.api.availability_status(&app.slot), Some(AvailabilityStatus::Available));
}

#[tokio::test]
async fn test_confirm_unknown_reservation_is_not_found() {
    let app = TestApp::new();

    let (status, _) = app
        .post(
            "/api/bookings/confirm",
            None,
            json!({
                "tenant_id": app.tenant.id,
                "reservation_id": ReservationId::new(),
            }),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_availability_for_day() {
    let app = TestApp::new();
    let uri = format!(
        "/api/tenants/{}/courts/1/availability?date=2025-06-01",
        app.tenant.id
    );

    let (status, body) = app.request(Method::GET, &uri, None, None).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    let slots = body["slots"].as_array().unwrap();
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0]["status"], "available");

    let (status, _) = app
        .request(
            Method::GET,
            &format!("/api/tenants/{}/courts/1/availability?date=June", app.tenant.id),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Owner endpoints
// ============================================================================

#[tokio::test]
async fn test_owner_endpoints_require_token() {
    let app = TestApp::new();

    let (status, body) = app
        .post(
            "/api/stripe/connect-account",
            None,
            json!({"tenant_id": app.tenant.id}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = app
        .post(
            "/api/stripe/connect-account",
            Some("unknown-token"),
            json!({"tenant_id": app.tenant.id}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_foreign_tenant_is_forbidden() {
    let app = TestApp::new();

    let (status, body) = app
        .post(
            "/api/availability",
            Some(STRANGER_TOKEN),
            json!({
                "tenant_id": app.tenant.id,
                "court_number": 1,
                "slots": [{"start_time": "2025-06-02T10:00:00Z", "end_time": "2025-06-02T11:00:00Z"}]
            }),
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_owner_publishes_availability() {
    let app = TestApp::new();

    let (status, body) = app
        .post(
            "/api/availability",
            Some(OWNER_TOKEN),
            json!({
                "tenant_id": app.tenant.id,
                "court_number": 1,
                "slots": [
                    {"start_time": "2025-06-02T10:00:00Z", "end_time": "2025-06-02T11:00:00Z"},
                    {"start_time": "2025-06-02T11:00:00Z", "end_time": "2025-06-02T12:00:00Z"}
                ]
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["slots"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_connect_account_creates_account_once() {
    let app = TestApp::new();
    let mut tenant = app.tenant.clone();
    tenant.stripe_account_id = None;
    app.api.seed_tenant(tenant.clone());

    let (status, first) = app
        .post(
            "/api/stripe/connect-account",
            Some(OWNER_TOKEN),
            json!({"tenant_id": tenant.id}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{first}");
    let account_id = first["account_id"].as_str().unwrap().to_string();
    assert!(first["url"].as_str().unwrap().ends_with(&account_id));
    assert_eq!(
        app.api.tenant(tenant.id).unwrap().stripe_account_id,
        Some(account_id.clone())
    );

    let (_, second) = app
        .post(
            "/api/stripe/connect-account",
            Some(OWNER_TOKEN),
            json!({"tenant_id": tenant.id}),
        )
        .await;
    assert_eq!(second["account_id"], account_id);
    assert_eq!(app.platform.call_count("create_account"), 1);

    let (status, account) = app
        .post(
            "/api/stripe/account-status",
            Some(OWNER_TOKEN),
            json!({"tenant_id": tenant.id}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(account["charges_enabled"], false);

    app.platform.complete_onboarding(&account_id);
    let (_, account) = app
        .post(
            "/api/stripe/account-status",
            Some(OWNER_TOKEN),
            json!({"tenant_id": tenant.id}),
        )
        .await;
    assert_eq!(account["charges_enabled"], true);

    let (status, session) = app
        .post(
            "/api/stripe/account-session",
            Some(OWNER_TOKEN),
            json!({"tenant_id": tenant.id}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["client_secret"], format!("accs_secret_{account_id}"));
}

#[tokio::test]
async fn test_create_product_requires_connected_account() {
    let app = TestApp::new();
    let mut tenant = app.tenant.clone();
    tenant.stripe_account_id = None;
    app.api.seed_tenant(tenant.clone());

    let (status, body) = app
        .post(
            "/api/products",
            Some(OWNER_TOKEN),
            json!({
                "tenant_id": tenant.id,
                "name": "Racket",
                "kind": "equipment",
                "pricing": {"type": "flat", "price": 500}
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ACCOUNT_NOT_CONNECTED");
    assert_eq!(app.platform.call_count("create_product_with_price"), 0);
}

#[tokio::test]
async fn test_create_product_on_connected_account() {
    let app = TestApp::new();

    let (status, body) = app
        .post(
            "/api/products",
            Some(OWNER_TOKEN),
            json!({
                "tenant_id": app.tenant.id,
                "name": "Racket",
                "kind": "equipment",
                "pricing": {"type": "flat", "price": 500}
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert!(body["stripe_price_id"].as_str().unwrap().starts_with("price_"));

    let request = app.platform.last_product_request().unwrap();
    assert_eq!(request.account_id, "acct_test");
    assert_eq!(request.unit_amount.cents(), 500);
    assert_eq!(request.currency, "usd");

    let product_id: ProductId = serde_json::from_value(body["id"].clone()).unwrap();
    assert!(app.api.product(product_id).is_some());
}
