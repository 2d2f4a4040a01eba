//! Payment intent requester.
//!
//! Creates the charge for a reservation on the tenant's connected account,
//! and looks up or cancels it during reconciliation.

use crate::payments::{PaymentIntentRequest, PaymentPlatform, PaymentPlatformError};
use crate::types::{PaymentIntentHandle, PaymentIntentStatus, Reservation};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Requests payment intents for reservations
#[derive(Clone)]
pub struct PaymentIntentRequester {
    platform: Arc<dyn PaymentPlatform>,
}

impl PaymentIntentRequester {
    /// Create a requester over a payment platform
    #[must_use]
    pub fn new(platform: Arc<dyn PaymentPlatform>) -> Self {
        Self { platform }
    }

    /// Create the payment intent for a reservation.
    ///
    /// The reservation id is the idempotency key, so a retried request
    /// yields the same intent.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentPlatformError`] if the platform rejects the request.
    #[tracing::instrument(skip(self, reservation), fields(reservation_id = %reservation.id))]
    pub async fn request(
        &self,
        reservation: &Reservation,
    ) -> Result<PaymentIntentHandle, PaymentPlatformError> {
        let request = PaymentIntentRequest {
            account_id: reservation.merchant_account_id.clone(),
            amount: reservation.quote.total,
            currency: reservation.quote.currency.clone(),
            metadata: metadata(reservation),
            description: format!(
                "Court {} booking {}",
                reservation.slot.court_number,
                reservation.slot.start_time.format("%Y-%m-%d %H:%M UTC")
            ),
            receipt_email: Some(reservation.guest.email.clone()),
            idempotency_key: format!("reservation-{}", reservation.id),
        };

        let intent = self.platform.create_payment_intent(request).await?;
        tracing::info!(intent_id = %intent.id, amount = intent.amount.cents(), "Payment intent created");
        Ok(intent)
    }

    /// Current status of a reservation's payment intent
    ///
    /// # Errors
    ///
    /// Returns [`PaymentPlatformError`] on platform failure.
    pub async fn status(
        &self,
        reservation: &Reservation,
        intent: &PaymentIntentHandle,
    ) -> Result<PaymentIntentStatus, PaymentPlatformError> {
        self.platform
            .retrieve_payment_intent(&reservation.merchant_account_id, &intent.id)
            .await
    }

    /// Cancel a reservation's payment intent
    ///
    /// # Errors
    ///
    /// Returns [`PaymentPlatformError`] on platform failure.
    pub async fn cancel(
        &self,
        reservation: &Reservation,
        intent: &PaymentIntentHandle,
    ) -> Result<(), PaymentPlatformError> {
        self.platform
            .cancel_payment_intent(&reservation.merchant_account_id, &intent.id)
            .await
    }
}

/// Metadata that lets a payment be traced back to its reservation
fn metadata(reservation: &Reservation) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::from([
        ("tenant_id".to_string(), reservation.tenant_id.to_string()),
        ("reservation_id".to_string(), reservation.id.to_string()),
        (
            "court_number".to_string(),
            reservation.slot.court_number.to_string(),
        ),
        (
            "start_time".to_string(),
            reservation.slot.start_time.to_rfc3339(),
        ),
        ("end_time".to_string(), reservation.end_time.to_rfc3339()),
        ("guest_name".to_string(), reservation.guest.name.clone()),
        ("guest_email".to_string(), reservation.guest.email.clone()),
        (
            "product_ids".to_string(),
            reservation
                .quote
                .lines
                .iter()
                .map(|l| l.product_id.to_string())
                .collect::<Vec<_>>()
                .join(","),
        ),
    ]);
    if let Some(phone) = &reservation.guest.phone {
        metadata.insert("guest_phone".to_string(), phone.clone());
    }
    metadata
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::mocks::{MockPaymentPlatform, sample_reservation};

    #[tokio::test]
    async fn test_request_scopes_intent_to_merchant_account() {
        let platform = Arc::new(MockPaymentPlatform::new());
        let requester = PaymentIntentRequester::new(platform.clone());
        let reservation = sample_reservation();

        let intent = requester.request(&reservation).await.unwrap();

        assert_eq!(intent.amount, reservation.quote.total);
        let sent = platform.last_intent_request().unwrap();
        assert_eq!(sent.account_id, reservation.merchant_account_id);
        assert_eq!(sent.metadata["reservation_id"], reservation.id.to_string());
        assert_eq!(sent.metadata["tenant_id"], reservation.tenant_id.to_string());
        assert_eq!(
            sent.metadata["court_number"],
            reservation.slot.court_number.to_string()
        );
        assert!(sent.metadata.contains_key("guest_email"));
    }

    #[tokio::test]
    async fn test_request_surfaces_platform_error() {
        let platform = Arc::new(MockPaymentPlatform::new());
        platform.fail_next("create_payment_intent");
        let requester = PaymentIntentRequester::new(platform);

        let err = requester.request(&sample_reservation()).await.unwrap_err();

        assert!(matches!(err, PaymentPlatformError::Api { .. }));
    }
}
