//! Quote computation.
//!
//! A quote prices a reservation from the tenant's products: hourly products
//! are charged for the slot duration, flat products once per unit.

use crate::types::{Money, PricingModel, Product, ProductSelection, Quote, QuoteLine, TenantId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Reasons a quote cannot be produced
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    /// No products were selected
    #[error("at least one product must be selected")]
    EmptySelection,

    /// End time is not after start time
    #[error("booking must end after it starts")]
    InvalidDuration,

    /// A selected product is unknown, belongs to another tenant or is inactive
    #[error("product {0} is not available for booking")]
    UnknownProduct(String),

    /// A selection has quantity zero
    #[error("quantity for product {0} must be at least 1")]
    ZeroQuantity(String),

    /// The quote sums to nothing
    #[error("quote total must be positive")]
    ZeroTotal,

    /// The amount does not fit in the money type
    #[error("quote total overflows")]
    Overflow,
}

const SECONDS_PER_HOUR: u64 = 3600;

/// Price an hourly rate over `seconds`, rounding half-up to the cent
#[must_use]
pub fn hourly_amount(rate: Money, seconds: u64) -> Option<Money> {
    let scaled = rate
        .cents()
        .checked_mul(seconds)?
        .checked_add(SECONDS_PER_HOUR / 2)?;
    Some(Money::from_cents(scaled / SECONDS_PER_HOUR))
}

/// Compute the quote for a reservation.
///
/// `products` are the candidate products loaded for the tenant; every
/// selection must refer to one of them that belongs to `tenant_id` and is
/// active.
///
/// # Errors
///
/// Returns [`PricingError`] when the selection or time range is invalid or
/// the total is not positive.
pub fn quote(
    tenant_id: TenantId,
    products: &[Product],
    selections: &[ProductSelection],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    currency: &str,
) -> Result<Quote, PricingError> {
    if selections.is_empty() {
        return Err(PricingError::EmptySelection);
    }

    let seconds = u64::try_from((end - start).num_seconds())
        .ok()
        .filter(|s| *s > 0)
        .ok_or(PricingError::InvalidDuration)?;

    let mut lines = Vec::with_capacity(selections.len());
    let mut total = Money::ZERO;

    for selection in selections {
        let product = products
            .iter()
            .find(|p| p.id == selection.product_id && p.tenant_id == tenant_id && p.active)
            .ok_or_else(|| PricingError::UnknownProduct(selection.product_id.to_string()))?;

        if selection.quantity == 0 {
            return Err(PricingError::ZeroQuantity(selection.product_id.to_string()));
        }

        let unit = match product.pricing {
            PricingModel::Hourly { rate } => hourly_amount(rate, seconds),
            PricingModel::Flat { price } => Some(price),
        };
        let amount = unit
            .and_then(|u| u.checked_mul(u64::from(selection.quantity)))
            .ok_or(PricingError::Overflow)?;

        total = total.checked_add(amount).ok_or(PricingError::Overflow)?;
        lines.push(QuoteLine {
            product_id: product.id,
            name: product.name.clone(),
            quantity: selection.quantity,
            amount,
        });
    }

    if total.is_zero() {
        return Err(PricingError::ZeroTotal);
    }

    Ok(Quote {
        lines,
        total,
        currency: currency.to_string(),
    })
}
