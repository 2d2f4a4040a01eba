//! Stripe REST client.
//!
//! Requests are form-encoded with bracketed keys (`metadata[tenant_id]`).
//! Calls on a connected account carry the `Stripe-Account` header.

use super::{
    ConnectedAccount, CreatedProduct, NewAccount, PaymentIntentRequest, PaymentPlatform,
    PaymentPlatformError, ProductRequest,
};
use crate::config::PaymentsConfig;
use crate::types::{Money, PaymentIntentHandle, PaymentIntentStatus};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, header::CONTENT_TYPE};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::form_urlencoded;

/// Stripe API client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    api_base: String,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

type Form = Vec<(String, String)>;

fn field(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

fn encode(form: &Form) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(form.iter())
        .finish()
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Deserialize)]
struct AccountObject {
    id: String,
    #[serde(default)]
    charges_enabled: bool,
    #[serde(default)]
    payouts_enabled: bool,
    #[serde(default)]
    details_submitted: bool,
    #[serde(default)]
    requirements: Option<Requirements>,
}

#[derive(Deserialize, Default)]
struct Requirements {
    #[serde(default)]
    currently_due: Vec<String>,
}

impl From<AccountObject> for ConnectedAccount {
    fn from(account: AccountObject) -> Self {
        Self {
            id: account.id,
            charges_enabled: account.charges_enabled,
            payouts_enabled: account.payouts_enabled,
            details_submitted: account.details_submitted,
            currently_due: account.requirements.unwrap_or_default().currently_due,
        }
    }
}

#[derive(Deserialize)]
struct UrlObject {
    url: String,
}

#[derive(Deserialize)]
struct ClientSecretObject {
    client_secret: String,
}

#[derive(Deserialize)]
struct PaymentIntentObject {
    id: String,
    client_secret: Option<String>,
    amount: u64,
    currency: String,
    status: PaymentIntentStatus,
}

#[derive(Deserialize)]
struct ProductObject {
    id: String,
    default_price: Option<String>,
}

impl StripeClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns [`PaymentPlatformError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: &PaymentsConfig) -> Result<Self, PaymentPlatformError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| PaymentPlatformError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            secret_key: config.secret_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, path: &str, account: Option<&str>) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{path}", self.api_base))
            .bearer_auth(&self.secret_key);
        match account {
            Some(account_id) => builder.header("Stripe-Account", account_id),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, PaymentPlatformError> {
        let response = builder
            .send()
            .await
            .map_err(|e| PaymentPlatformError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|e| e.error.message.or(e.error.kind))
                .unwrap_or(body);
            return Err(PaymentPlatformError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PaymentPlatformError::Decode(e.to_string()))
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        account: Option<&str>,
        form: &Form,
        idempotency_key: Option<&str>,
    ) -> Result<T, PaymentPlatformError> {
        let mut builder = self
            .request(Method::POST, path, account)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(encode(form));
        if let Some(key) = idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }
        Self::send(builder).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        account: Option<&str>,
    ) -> Result<T, PaymentPlatformError> {
        Self::send(self.request(Method::GET, path, account)).await
    }
}

fn account_form(account: &NewAccount) -> Form {
    let mut form = vec![
        field("type", "express"),
        field("business_profile[name]", &account.business_name),
        field("capabilities[card_payments][requested]", true),
        field("capabilities[transfers][requested]", true),
        field("metadata[tenant_id]", &account.tenant_id),
    ];
    if let Some(email) = &account.email {
        form.push(field("email", email));
    }
    form
}

fn payment_intent_form(request: &PaymentIntentRequest) -> Form {
    let mut form = vec![
        field("amount", request.amount.cents()),
        field("currency", &request.currency),
        field("automatic_payment_methods[enabled]", true),
        field("description", &request.description),
    ];
    if let Some(email) = &request.receipt_email {
        form.push(field("receipt_email", email));
    }
    for (key, value) in &request.metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
    }
    form
}

fn product_form(request: &ProductRequest) -> Form {
    vec![
        field("name", &request.name),
        field("default_price_data[unit_amount]", request.unit_amount.cents()),
        field("default_price_data[currency]", &request.currency),
    ]
}

#[async_trait]
impl PaymentPlatform for StripeClient {
    #[tracing::instrument(skip(self, account), fields(tenant_id = %account.tenant_id))]
    async fn create_account(&self, account: NewAccount) -> Result<ConnectedAccount, PaymentPlatformError> {
        let object: AccountObject = self
            .post("/v1/accounts", None, &account_form(&account), None)
            .await?;
        Ok(object.into())
    }

    #[tracing::instrument(skip(self))]
    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, PaymentPlatformError> {
        let object: AccountObject = self.get(&format!("/v1/accounts/{account_id}"), None).await?;
        Ok(object.into())
    }

    #[tracing::instrument(skip(self))]
    async fn create_account_link(
        &self,
        account_id: &str,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<String, PaymentPlatformError> {
        let form = vec![
            field("account", account_id),
            field("refresh_url", refresh_url),
            field("return_url", return_url),
            field("type", "account_onboarding"),
        ];
        let link: UrlObject = self.post("/v1/account_links", None, &form, None).await?;
        Ok(link.url)
    }

    #[tracing::instrument(skip(self))]
    async fn create_account_session(&self, account_id: &str) -> Result<String, PaymentPlatformError> {
        let form = vec![
            field("account", account_id),
            field("components[account_onboarding][enabled]", true),
        ];
        let session: ClientSecretObject =
            self.post("/v1/account_sessions", None, &form, None).await?;
        Ok(session.client_secret)
    }

    #[tracing::instrument(
        skip(self, request),
        fields(account_id = %request.account_id, amount = request.amount.cents())
    )]
    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<PaymentIntentHandle, PaymentPlatformError> {
        let intent: PaymentIntentObject = self
            .post(
                "/v1/payment_intents",
                Some(&request.account_id),
                &payment_intent_form(&request),
                Some(&request.idempotency_key),
            )
            .await?;

        let client_secret = intent.client_secret.ok_or_else(|| {
            PaymentPlatformError::Decode(format!("payment intent {} has no client secret", intent.id))
        })?;

        Ok(PaymentIntentHandle {
            id: intent.id,
            client_secret,
            amount: Money::from_cents(intent.amount),
            currency: intent.currency,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn retrieve_payment_intent(
        &self,
        account_id: &str,
        intent_id: &str,
    ) -> Result<PaymentIntentStatus, PaymentPlatformError> {
        let intent: PaymentIntentObject = self
            .get(&format!("/v1/payment_intents/{intent_id}"), Some(account_id))
            .await?;
        Ok(intent.status)
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_payment_intent(
        &self,
        account_id: &str,
        intent_id: &str,
    ) -> Result<(), PaymentPlatformError> {
        let form = vec![field("cancellation_reason", "abandoned")];
        let _: PaymentIntentObject = self
            .post(
                &format!("/v1/payment_intents/{intent_id}/cancel"),
                Some(account_id),
                &form,
                None,
            )
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, request), fields(account_id = %request.account_id))]
    async fn create_product_with_price(
        &self,
        request: ProductRequest,
    ) -> Result<CreatedProduct, PaymentPlatformError> {
        let product: ProductObject = self
            .post(
                "/v1/products",
                Some(&request.account_id),
                &product_form(&request),
                None,
            )
            .await?;

        let price_id = product.default_price.ok_or_else(|| {
            PaymentPlatformError::Decode(format!("product {} has no default price", product.id))
        })?;

        Ok(CreatedProduct {
            product_id: product.id,
            price_id,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_payment_intent_form_uses_bracket_keys() {
        let mut metadata = BTreeMap::new();
        metadata.insert("reservation_id".to_string(), "r-1".to_string());
        metadata.insert("court_number".to_string(), "3".to_string());

        let request = PaymentIntentRequest {
            account_id: "acct_1".to_string(),
            amount: Money::from_cents(7500),
            currency: "usd".to_string(),
            metadata,
            description: "Court 3".to_string(),
            receipt_email: Some("ana@example.com".to_string()),
            idempotency_key: "r-1".to_string(),
        };

        let body = encode(&payment_intent_form(&request));

        assert!(body.contains("amount=7500"));
        assert!(body.contains("automatic_payment_methods%5Benabled%5D=true"));
        assert!(body.contains("metadata%5Breservation_id%5D=r-1"));
        assert!(body.contains("receipt_email=ana%40example.com"));
    }

    #[test]
    fn test_product_form_carries_default_price() {
        let form = product_form(&ProductRequest {
            account_id: "acct_1".to_string(),
            name: "Court rental".to_string(),
            unit_amount: Money::from_cents(5000),
            currency: "eur".to_string(),
        });

        assert!(form.contains(&field("default_price_data[unit_amount]", 5000)));
        assert!(form.contains(&field("default_price_data[currency]", "eur")));
    }

    #[test]
    fn test_account_requirements_default_to_empty() {
        let account: AccountObject =
            serde_json::from_str(r#"{"id":"acct_1","charges_enabled":true}"#).unwrap();
        let account = ConnectedAccount::from(account);

        assert!(account.charges_enabled);
        assert!(!account.payouts_enabled);
        assert!(account.currently_due.is_empty());
    }

    #[test]
    fn test_error_envelope_message() {
        let envelope: ErrorEnvelope =
            serde_json::from_str(r#"{"error":{"message":"No such account","type":"invalid_request_error"}}"#)
                .unwrap();
        assert_eq!(envelope.error.message.as_deref(), Some("No such account"));
    }
}
