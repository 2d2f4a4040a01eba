//! Domain types for the court booking service.
//!
//! Value objects and records shared by the Data API client, the payment
//! platform client, the reservation saga and the HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id! {
    /// Unique identifier for a tenant (company / facility)
    TenantId
}

uuid_id! {
    /// Unique identifier for a reservation (one run of the booking saga)
    ReservationId
}

uuid_id! {
    /// Unique identifier for a booking row
    BookingId
}

uuid_id! {
    /// Unique identifier for a product (court rental or equipment)
    ProductId
}

uuid_id! {
    /// Unique identifier for an authenticated user
    UserId
}

impl BookingId {
    /// The booking id written for a reservation.
    ///
    /// One reservation produces at most one booking, so the id is the
    /// reservation id; a retried write finds the existing row.
    #[must_use]
    pub const fn for_reservation(reservation_id: ReservationId) -> Self {
        Self(reservation_id.0)
    }
}

// ============================================================================
// Money
// ============================================================================

/// An amount in the smallest currency unit (cents)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Multiplies by a quantity with overflow checking
    #[must_use]
    pub const fn checked_mul(self, quantity: u64) -> Option<Self> {
        match self.0.checked_mul(quantity) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Availability
// ============================================================================

/// Status of a court time slot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityStatus {
    /// Open for booking
    Available,
    /// Temporarily held by a reservation in progress
    Held,
    /// Booked
    Booked,
}

/// A status change the availability state machine does not allow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("invalid availability transition {from} -> {to}")]
pub struct InvalidTransition {
    /// Current status
    pub from: AvailabilityStatus,
    /// Requested status
    pub to: AvailabilityStatus,
}

impl AvailabilityStatus {
    /// Whether `self -> next` is a legal transition.
    ///
    /// `available -> held`, `held -> booked` and `held -> available`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Available, Self::Held) | (Self::Held, Self::Booked | Self::Available)
        )
    }

    /// Validate a transition, returning the new status.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] for anything `can_transition_to` rejects.
    pub const fn transition_to(self, next: Self) -> Result<Self, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Wire representation used by the Data API
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Held => "held",
            Self::Booked => "booked",
        }
    }
}

impl fmt::Display for AvailabilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one court time slot within a tenant
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotKey {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Court number within the tenant
    pub court_number: u32,
    /// Slot start
    pub start_time: DateTime<Utc>,
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/court-{}@{}",
            self.tenant_id,
            self.court_number,
            self.start_time.to_rfc3339()
        )
    }
}

/// A court time slot and its status
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Court number within the tenant
    pub court_number: u32,
    /// Slot start
    pub start_time: DateTime<Utc>,
    /// Slot end
    pub end_time: DateTime<Utc>,
    /// Current status
    pub status: AvailabilityStatus,
    /// Reservation holding (or that booked) the slot. Internal to the
    /// service; never sent to guests.
    #[serde(skip)]
    pub held_by: Option<ReservationId>,
}

impl Availability {
    /// Key of this slot
    #[must_use]
    pub fn key(&self) -> SlotKey {
        SlotKey {
            tenant_id: self.tenant_id,
            court_number: self.court_number,
            start_time: self.start_time,
        }
    }
}

/// A court belonging to a tenant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Court {
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Court number within the tenant
    pub court_number: u32,
    /// Display name
    pub name: String,
}

// ============================================================================
// Tenants and products
// ============================================================================

/// A company / facility: the multi-tenancy boundary
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    /// Tenant id
    pub id: TenantId,
    /// Display name
    pub name: String,
    /// User that owns (administers) this tenant
    pub owner_id: UserId,
    /// Contact email
    pub email: Option<String>,
    /// Connected merchant account on the payment platform
    pub stripe_account_id: Option<String>,
}

/// What a product is rented as
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    /// Court rental
    Court,
    /// Equipment rental (rackets, balls, ...)
    Equipment,
}

/// How a product is priced
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PricingModel {
    /// Charged per hour of the booked slot
    Hourly {
        /// Cents per hour
        rate: Money,
    },
    /// Charged once per booking
    Flat {
        /// Cents per unit
        price: Money,
    },
}

impl PricingModel {
    /// The amount sent to the payment platform as the product's default price
    #[must_use]
    pub const fn unit_amount(&self) -> Money {
        match self {
            Self::Hourly { rate } => *rate,
            Self::Flat { price } => *price,
        }
    }
}

/// A bookable product of a tenant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Product id
    pub id: ProductId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Display name
    pub name: String,
    /// Court or equipment
    pub kind: ProductKind,
    /// Price
    pub pricing: PricingModel,
    /// Product id on the payment platform
    pub stripe_product_id: Option<String>,
    /// Default price id on the payment platform
    pub stripe_price_id: Option<String>,
    /// Inactive products cannot be booked
    pub active: bool,
}

const fn one() -> u32 {
    1
}

/// A product chosen by the guest
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSelection {
    /// Selected product
    pub product_id: ProductId,
    /// How many (defaults to 1)
    #[serde(default = "one")]
    pub quantity: u32,
}

/// One priced line of a quote
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLine {
    /// Product
    pub product_id: ProductId,
    /// Product name at quote time
    pub name: String,
    /// Quantity
    pub quantity: u32,
    /// Line total
    pub amount: Money,
}

/// The price of a reservation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Priced lines
    pub lines: Vec<QuoteLine>,
    /// Sum of all lines
    pub total: Money,
    /// Lowercase ISO currency
    pub currency: String,
}

// ============================================================================
// Guests, bookings, payments
// ============================================================================

/// Contact details of the guest making a booking
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestInfo {
    /// Full name
    pub name: String,
    /// Email address
    pub email: String,
    /// Phone number
    #[serde(default)]
    pub phone: Option<String>,
}

impl GuestInfo {
    /// Check the required contact fields.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("guest name is required".to_string());
        }
        let email = self.email.trim();
        if email.is_empty() {
            return Err("guest email is required".to_string());
        }
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
            _ => Err(format!("guest email '{email}' is not a valid address")),
        }
    }
}

/// Payment status of a booking
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Payment intent created, not yet settled
    Pending,
    /// Payment is being processed
    Processing,
    /// Paid
    Paid,
    /// Refunded
    Refunded,
    /// Failed
    Failed,
}

impl PaymentStatus {
    /// Wire representation used by the Data API
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Paid => "paid",
            Self::Refunded => "refunded",
            Self::Failed => "failed",
        }
    }
}

/// A booking row
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking id
    pub id: BookingId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Court number
    pub court_number: u32,
    /// Slot start
    pub start_time: DateTime<Utc>,
    /// Slot end
    pub end_time: DateTime<Utc>,
    /// Guest contact details
    pub guest: GuestInfo,
    /// Payment status
    pub payment_status: PaymentStatus,
    /// Payment intent the guest pays through
    pub payment_intent_id: String,
    /// Amount charged
    pub amount: Money,
    /// Free-form metadata (reservation id, quote lines)
    pub metadata: serde_json::Value,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// The part of a payment intent the service keeps
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntentHandle {
    /// Payment intent id
    pub id: String,
    /// Secret the client confirms the payment with
    pub client_secret: String,
    /// Amount the intent was created for
    pub amount: Money,
    /// Currency the intent was created for
    pub currency: String,
}

/// Lifecycle status of a payment intent on the payment platform
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    /// Waiting for a payment method
    RequiresPaymentMethod,
    /// Waiting for confirmation
    RequiresConfirmation,
    /// Waiting for customer action (3DS, ...)
    RequiresAction,
    /// Being processed
    Processing,
    /// Authorized, waiting for capture
    RequiresCapture,
    /// Canceled
    Canceled,
    /// Paid
    Succeeded,
    /// A status this service does not know about
    #[serde(other)]
    Unknown,
}

impl PaymentIntentStatus {
    /// Whether the guest has paid or the payment is underway.
    ///
    /// Such a reservation is rolled forward into a booking instead of
    /// being released.
    #[must_use]
    pub const fn is_paid_or_processing(self) -> bool {
        matches!(self, Self::Succeeded | Self::Processing | Self::RequiresCapture)
    }
}

// ============================================================================
// Reservations
// ============================================================================

/// Stage of the reservation saga
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStage {
    /// Intent record written, slot not yet held
    Initiated,
    /// Slot held, payment intent not yet created
    Held,
    /// Payment intent created, waiting for the guest to pay and confirm
    AwaitingPayment,
    /// Booking row written, slot not yet marked booked
    BookingRecorded,
    /// Booking written and slot booked
    Confirmed,
    /// Hold released (payment failure or expiry)
    Released,
    /// Failed before the slot was held
    Failed,
}

impl ReservationStage {
    /// All stages the reconciliation sweeper still has to look at
    pub const OPEN: [Self; 4] = [
        Self::Initiated,
        Self::Held,
        Self::AwaitingPayment,
        Self::BookingRecorded,
    ];

    /// No further transitions happen from a terminal stage
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Released | Self::Failed)
    }

    /// Wire representation used by the Data API
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Held => "held",
            Self::AwaitingPayment => "awaiting_payment",
            Self::BookingRecorded => "booking_recorded",
            Self::Confirmed => "confirmed",
            Self::Released => "released",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ReservationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reservation: the saga's record, persisted as the intent record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation id
    pub id: ReservationId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Merchant account the payment is collected on
    pub merchant_account_id: String,
    /// Slot being reserved
    pub slot: SlotKey,
    /// Slot end
    pub end_time: DateTime<Utc>,
    /// Guest contact details
    pub guest: GuestInfo,
    /// Price
    pub quote: Quote,
    /// Saga stage
    pub stage: ReservationStage,
    /// Payment intent, once created
    pub payment_intent: Option<PaymentIntentHandle>,
    /// Booking, once written
    pub booking_id: Option<BookingId>,
    /// Last upstream error seen by the saga
    pub last_error: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last stage change
    pub updated_at: DateTime<Utc>,
    /// When the hold lapses
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Move to `stage`, stamping `updated_at`
    pub fn advance(&mut self, stage: ReservationStage, now: DateTime<Utc>) {
        self.stage = stage;
        self.updated_at = now;
    }
}

/// An authenticated caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    /// User id
    pub id: UserId,
    /// Email, when the identity provider returns one
    pub email: Option<String>,
}
