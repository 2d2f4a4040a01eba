//! Payment platform (Stripe Connect) client.
//!
//! [`PaymentPlatform`] covers the calls this service makes: connected
//! account onboarding, product/price creation on a connected account and
//! payment intents. [`StripeClient`] talks to the REST API; tests use
//! [`MockPaymentPlatform`](crate::mocks::MockPaymentPlatform).

use crate::types::{Money, PaymentIntentHandle, PaymentIntentStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

mod stripe;

pub use stripe::StripeClient;

/// Errors returned by the payment platform
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentPlatformError {
    /// The request never produced a response
    #[error("payment platform transport error: {0}")]
    Transport(String),

    /// The platform rejected the request
    #[error("payment platform error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Platform error message
        message: String,
    },

    /// The response could not be decoded
    #[error("payment platform response could not be decoded: {0}")]
    Decode(String),
}

/// A connected merchant account and its onboarding state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedAccount {
    /// Account id (`acct_...`)
    pub id: String,
    /// Whether the account can accept charges
    pub charges_enabled: bool,
    /// Whether the account can receive payouts
    pub payouts_enabled: bool,
    /// Whether onboarding details were submitted
    pub details_submitted: bool,
    /// Requirements still due
    pub currently_due: Vec<String>,
}

/// Input for a new connected account
#[derive(Debug, Clone)]
pub struct NewAccount {
    /// Contact email of the merchant
    pub email: Option<String>,
    /// Business name
    pub business_name: String,
    /// Tenant the account belongs to (stored as metadata)
    pub tenant_id: String,
}

/// A payment intent to create on a connected account
#[derive(Debug, Clone)]
pub struct PaymentIntentRequest {
    /// Connected account the charge is made on
    pub account_id: String,
    /// Amount in cents
    pub amount: Money,
    /// Lowercase ISO currency
    pub currency: String,
    /// Reconciliation metadata
    pub metadata: BTreeMap<String, String>,
    /// Statement description
    pub description: String,
    /// Email the receipt is sent to
    pub receipt_email: Option<String>,
    /// Makes retries of the same request create one intent
    pub idempotency_key: String,
}

/// A product with a default price on a connected account
#[derive(Debug, Clone)]
pub struct ProductRequest {
    /// Connected account
    pub account_id: String,
    /// Product name
    pub name: String,
    /// Default price in cents
    pub unit_amount: Money,
    /// Lowercase ISO currency
    pub currency: String,
}

/// Ids of a created product and its default price
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedProduct {
    /// Product id (`prod_...`)
    pub product_id: String,
    /// Default price id (`price_...`)
    pub price_id: String,
}

/// Calls the service makes on the payment platform
#[async_trait]
pub trait PaymentPlatform: Send + Sync {
    /// Create an Express connected account
    async fn create_account(&self, account: NewAccount) -> Result<ConnectedAccount, PaymentPlatformError>;

    /// Retrieve a connected account
    async fn retrieve_account(&self, account_id: &str) -> Result<ConnectedAccount, PaymentPlatformError>;

    /// Create an onboarding link, returning its URL
    async fn create_account_link(
        &self,
        account_id: &str,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<String, PaymentPlatformError>;

    /// Create an account session for embedded onboarding, returning its client secret
    async fn create_account_session(&self, account_id: &str) -> Result<String, PaymentPlatformError>;

    /// Create a payment intent on a connected account
    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<PaymentIntentHandle, PaymentPlatformError>;

    /// Status of a payment intent
    async fn retrieve_payment_intent(
        &self,
        account_id: &str,
        intent_id: &str,
    ) -> Result<PaymentIntentStatus, PaymentPlatformError>;

    /// Cancel a payment intent
    async fn cancel_payment_intent(
        &self,
        account_id: &str,
        intent_id: &str,
    ) -> Result<(), PaymentPlatformError>;

    /// Create a product with a default price on a connected account
    async fn create_product_with_price(
        &self,
        request: ProductRequest,
    ) -> Result<CreatedProduct, PaymentPlatformError>;
}
