//! In-memory implementations of the external platforms.
//!
//! Used by unit and integration tests, and handy for running the service
//! locally without a database or payment account. Every operation counts its
//! calls and can be made to fail on demand.

use crate::availability::AvailabilityAccessor;
use crate::booking_writer::BookingWriter;
use crate::data_api::{CourtDataApi, DataApiError};
use crate::identity::{IdentityError, IdentityProvider};
use crate::intents::IntentLedger;
use crate::payment_intents::PaymentIntentRequester;
use crate::payments::{
    ConnectedAccount, CreatedProduct, NewAccount, PaymentIntentRequest, PaymentPlatform,
    PaymentPlatformError, ProductRequest,
};
use crate::reservation::ReservationEnvironment;
use crate::types::{
    AuthUser, Availability, AvailabilityStatus, Booking, BookingId, Court, GuestInfo, Money,
    PaymentIntentHandle, PaymentIntentStatus, Product, ProductId, Quote, QuoteLine, Reservation,
    ReservationId, ReservationStage, SlotKey, Tenant, TenantId, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use courtside_core::environment::Clock;
use courtside_runtime::retry::RetryPolicy;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Counts calls per operation and hands out injected failures
#[derive(Debug, Default)]
struct CallLog {
    calls: HashMap<String, usize>,
    failures: HashMap<String, usize>,
}

impl CallLog {
    /// Record a call; `true` if it should fail
    fn enter(&mut self, op: &str) -> bool {
        *self.calls.entry(op.to_string()).or_default() += 1;
        match self.failures.get_mut(op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            },
            _ => false,
        }
    }

    fn count(&self, op: &str) -> usize {
        self.calls.get(op).copied().unwrap_or_default()
    }

    fn fail(&mut self, op: &str, times: usize) {
        *self.failures.entry(op.to_string()).or_default() += times;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Data API
// ============================================================================

#[derive(Debug, Default)]
struct Tables {
    tenants: HashMap<TenantId, Tenant>,
    courts: HashMap<(TenantId, u32), Court>,
    availability: HashMap<SlotKey, Availability>,
    bookings: HashMap<BookingId, Booking>,
    products: HashMap<ProductId, Product>,
    reservations: HashMap<ReservationId, Reservation>,
    log: CallLog,
}

/// In-memory [`CourtDataApi`].
///
/// Conditional status updates are atomic, like the hosted database's.
#[derive(Debug, Default)]
pub struct InMemoryDataApi {
    tables: Mutex<Tables>,
}

impl InMemoryDataApi {
    /// Create an empty database
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self, op: &str) -> Result<MutexGuard<'_, Tables>, DataApiError> {
        let mut tables = lock(&self.tables);
        if tables.log.enter(op) {
            return Err(DataApiError::Transport(format!("injected failure in {op}")));
        }
        Ok(tables)
    }

    /// Make the next call to `op` fail with a transport error
    pub fn fail_next(&self, op: &str) {
        self.fail_times(op, 1);
    }

    /// Make the next `times` calls to `op` fail with a transport error
    pub fn fail_times(&self, op: &str, times: usize) {
        lock(&self.tables).log.fail(op, times);
    }

    /// Number of calls made to `op`
    #[must_use]
    pub fn call_count(&self, op: &str) -> usize {
        lock(&self.tables).log.count(op)
    }

    /// Insert or replace a tenant
    pub fn seed_tenant(&self, tenant: Tenant) {
        lock(&self.tables).tenants.insert(tenant.id, tenant);
    }

    /// Insert or replace a court
    pub fn seed_court(&self, court: Court) {
        lock(&self.tables)
            .courts
            .insert((court.tenant_id, court.court_number), court);
    }

    /// Insert or replace an availability row
    pub fn seed_availability(&self, slot: Availability) {
        lock(&self.tables).availability.insert(slot.key(), slot);
    }

    /// Insert or replace a product
    pub fn seed_product(&self, product: Product) {
        lock(&self.tables).products.insert(product.id, product);
    }

    /// Insert or replace a reservation intent record
    pub fn seed_reservation(&self, reservation: Reservation) {
        lock(&self.tables)
            .reservations
            .insert(reservation.id, reservation);
    }

    /// Current status of an availability row
    #[must_use]
    pub fn availability_status(&self, slot: &SlotKey) -> Option<AvailabilityStatus> {
        lock(&self.tables).availability.get(slot).map(|a| a.status)
    }

    /// Reservation holding an availability row
    #[must_use]
    pub fn availability_holder(&self, slot: &SlotKey) -> Option<ReservationId> {
        lock(&self.tables)
            .availability
            .get(slot)
            .and_then(|a| a.held_by)
    }

    /// A tenant row
    #[must_use]
    pub fn tenant(&self, id: TenantId) -> Option<Tenant> {
        lock(&self.tables).tenants.get(&id).cloned()
    }

    /// A booking row
    #[must_use]
    pub fn booking(&self, id: BookingId) -> Option<Booking> {
        lock(&self.tables).bookings.get(&id).cloned()
    }

    /// All booking rows
    #[must_use]
    pub fn bookings(&self) -> Vec<Booking> {
        lock(&self.tables).bookings.values().cloned().collect()
    }

    /// A product row
    #[must_use]
    pub fn product(&self, id: ProductId) -> Option<Product> {
        lock(&self.tables).products.get(&id).cloned()
    }

    /// A reservation intent record
    #[must_use]
    pub fn reservation(&self, id: ReservationId) -> Option<Reservation> {
        lock(&self.tables).reservations.get(&id).cloned()
    }
}

#[async_trait]
impl CourtDataApi for InMemoryDataApi {
    async fn get_tenant(&self, tenant_id: TenantId) -> Result<Option<Tenant>, DataApiError> {
        let tables = self.enter("get_tenant")?;
        Ok(tables.tenants.get(&tenant_id).cloned())
    }

    async fn set_tenant_stripe_account(
        &self,
        tenant_id: TenantId,
        account_id: &str,
    ) -> Result<(), DataApiError> {
        let mut tables = self.enter("set_tenant_stripe_account")?;
        let tenant = tables
            .tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| DataApiError::GraphQl(format!("company {tenant_id} not found")))?;
        tenant.stripe_account_id = Some(account_id.to_string());
        Ok(())
    }

    async fn get_court(
        &self,
        tenant_id: TenantId,
        court_number: u32,
    ) -> Result<Option<Court>, DataApiError> {
        let tables = self.enter("get_court")?;
        Ok(tables.courts.get(&(tenant_id, court_number)).cloned())
    }

    async fn update_availability_status(
        &self,
        slot: &SlotKey,
        expected: AvailabilityStatus,
        new: AvailabilityStatus,
        holder: ReservationId,
    ) -> Result<u64, DataApiError> {
        let mut tables = self.enter("update_availability_status")?;
        match tables.availability.get_mut(slot) {
            Some(row)
                if row.status == expected
                    && (expected != AvailabilityStatus::Held || row.held_by == Some(holder)) =>
            {
                row.status = new;
                row.held_by = (new != AvailabilityStatus::Available).then_some(holder);
                Ok(1)
            },
            _ => Ok(0),
        }
    }

    async fn get_availability(&self, slot: &SlotKey) -> Result<Option<Availability>, DataApiError> {
        let tables = self.enter("get_availability")?;
        Ok(tables.availability.get(slot).cloned())
    }

    async fn list_availability(
        &self,
        tenant_id: TenantId,
        court_number: u32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Availability>, DataApiError> {
        let tables = self.enter("list_availability")?;
        let mut rows: Vec<Availability> = tables
            .availability
            .values()
            .filter(|a| {
                a.tenant_id == tenant_id
                    && a.court_number == court_number
                    && a.start_time >= from
                    && a.start_time < to
            })
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.start_time);
        Ok(rows)
    }

    async fn insert_availability(&self, slots: &[Availability]) -> Result<(), DataApiError> {
        let mut tables = self.enter("insert_availability")?;
        if let Some(dup) = slots.iter().find(|s| tables.availability.contains_key(&s.key())) {
            return Err(DataApiError::GraphQl(format!(
                "duplicate key value for slot {}",
                dup.key()
            )));
        }
        for slot in slots {
            tables.availability.insert(slot.key(), slot.clone());
        }
        Ok(())
    }

    async fn get_booking(
        &self,
        tenant_id: TenantId,
        booking_id: BookingId,
    ) -> Result<Option<Booking>, DataApiError> {
        let tables = self.enter("get_booking")?;
        Ok(tables
            .bookings
            .get(&booking_id)
            .filter(|b| b.tenant_id == tenant_id)
            .cloned())
    }

    async fn insert_booking(&self, booking: &Booking) -> Result<(), DataApiError> {
        let mut tables = self.enter("insert_booking")?;
        if tables.bookings.contains_key(&booking.id) {
            return Err(DataApiError::GraphQl(format!(
                "duplicate key value for booking {}",
                booking.id
            )));
        }
        tables.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn list_products(
        &self,
        tenant_id: TenantId,
        ids: &[ProductId],
    ) -> Result<Vec<Product>, DataApiError> {
        let tables = self.enter("list_products")?;
        Ok(ids
            .iter()
            .filter_map(|id| tables.products.get(id))
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn insert_product(&self, product: &Product) -> Result<(), DataApiError> {
        let mut tables = self.enter("insert_product")?;
        tables.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn insert_reservation(&self, reservation: &Reservation) -> Result<(), DataApiError> {
        let mut tables = self.enter("insert_reservation")?;
        if tables.reservations.contains_key(&reservation.id) {
            return Err(DataApiError::GraphQl(format!(
                "duplicate key value for reservation intent {}",
                reservation.id
            )));
        }
        tables
            .reservations
            .insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn update_reservation(&self, reservation: &Reservation) -> Result<(), DataApiError> {
        let mut tables = self.enter("update_reservation")?;
        let row = tables.reservations.get_mut(&reservation.id).ok_or_else(|| {
            DataApiError::GraphQl(format!("reservation intent {} not found", reservation.id))
        })?;
        *row = reservation.clone();
        Ok(())
    }

    async fn get_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, DataApiError> {
        let tables = self.enter("get_reservation")?;
        Ok(tables.reservations.get(&reservation_id).cloned())
    }

    async fn list_stale_reservations(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, DataApiError> {
        let tables = self.enter("list_stale_reservations")?;
        let mut rows: Vec<Reservation> = tables
            .reservations
            .values()
            .filter(|r| !r.stage.is_terminal() && r.expires_at < before)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.expires_at);
        Ok(rows)
    }

    async fn ping(&self) -> Result<(), DataApiError> {
        self.enter("ping").map(|_| ())
    }
}

// ============================================================================
// Payment platform
// ============================================================================

#[derive(Debug, Default)]
struct Ledger {
    accounts: HashMap<String, ConnectedAccount>,
    intents: HashMap<String, (PaymentIntentHandle, PaymentIntentStatus)>,
    idempotency: HashMap<String, String>,
    intent_requests: Vec<PaymentIntentRequest>,
    cancelled: Vec<String>,
    products: Vec<ProductRequest>,
    sequence: u64,
    log: CallLog,
}

impl Ledger {
    fn next_id(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        format!("{prefix}_mock_{}", self.sequence)
    }
}

/// In-memory [`PaymentPlatform`].
///
/// Intents start as `requires_payment_method`; tests move them along with
/// [`set_intent_status`](Self::set_intent_status).
#[derive(Debug, Default)]
pub struct MockPaymentPlatform {
    ledger: Mutex<Ledger>,
}

impl MockPaymentPlatform {
    /// Create an empty platform
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self, op: &str) -> Result<MutexGuard<'_, Ledger>, PaymentPlatformError> {
        let mut ledger = lock(&self.ledger);
        if ledger.log.enter(op) {
            return Err(PaymentPlatformError::Api {
                status: 500,
                message: format!("injected failure in {op}"),
            });
        }
        Ok(ledger)
    }

    /// Make the next call to `op` fail with an API error
    pub fn fail_next(&self, op: &str) {
        self.fail_times(op, 1);
    }

    /// Make the next `times` calls to `op` fail with an API error
    pub fn fail_times(&self, op: &str, times: usize) {
        lock(&self.ledger).log.fail(op, times);
    }

    /// Number of calls made to `op`
    #[must_use]
    pub fn call_count(&self, op: &str) -> usize {
        lock(&self.ledger).log.count(op)
    }

    /// The most recent payment intent request
    #[must_use]
    pub fn last_intent_request(&self) -> Option<PaymentIntentRequest> {
        lock(&self.ledger).intent_requests.last().cloned()
    }

    /// The most recent product request
    #[must_use]
    pub fn last_product_request(&self) -> Option<ProductRequest> {
        lock(&self.ledger).products.last().cloned()
    }

    /// Ids of cancelled intents, in order
    #[must_use]
    pub fn cancelled_intents(&self) -> Vec<String> {
        lock(&self.ledger).cancelled.clone()
    }

    /// Number of distinct intents created
    #[must_use]
    pub fn intent_count(&self) -> usize {
        lock(&self.ledger).intents.len()
    }

    /// Move an intent to `status`, as the guest's payment would
    pub fn set_intent_status(&self, intent_id: &str, status: PaymentIntentStatus) {
        if let Some((_, current)) = lock(&self.ledger).intents.get_mut(intent_id) {
            *current = status;
        }
    }

    /// Register an account, e.g. one onboarded outside the test
    pub fn seed_account(&self, account: ConnectedAccount) {
        lock(&self.ledger)
            .accounts
            .insert(account.id.clone(), account);
    }

    /// Mark an account's onboarding as finished
    pub fn complete_onboarding(&self, account_id: &str) {
        if let Some(account) = lock(&self.ledger).accounts.get_mut(account_id) {
            account.charges_enabled = true;
            account.payouts_enabled = true;
            account.details_submitted = true;
            account.currently_due.clear();
        }
    }

    fn unknown(kind: &str, id: &str) -> PaymentPlatformError {
        PaymentPlatformError::Api {
            status: 404,
            message: format!("No such {kind}: '{id}'"),
        }
    }
}

#[async_trait]
impl PaymentPlatform for MockPaymentPlatform {
    async fn create_account(
        &self,
        _account: NewAccount,
    ) -> Result<ConnectedAccount, PaymentPlatformError> {
        let mut ledger = self.enter("create_account")?;
        let account = ConnectedAccount {
            id: ledger.next_id("acct"),
            charges_enabled: false,
            payouts_enabled: false,
            details_submitted: false,
            currently_due: vec!["external_account".to_string()],
        };
        ledger.accounts.insert(account.id.clone(), account.clone());
        Ok(account)
    }

    async fn retrieve_account(
        &self,
        account_id: &str,
    ) -> Result<ConnectedAccount, PaymentPlatformError> {
        let ledger = self.enter("retrieve_account")?;
        ledger
            .accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| Self::unknown("account", account_id))
    }

    async fn create_account_link(
        &self,
        account_id: &str,
        _refresh_url: &str,
        _return_url: &str,
    ) -> Result<String, PaymentPlatformError> {
        let ledger = self.enter("create_account_link")?;
        if !ledger.accounts.contains_key(account_id) {
            return Err(Self::unknown("account", account_id));
        }
        Ok(format!("https://connect.mock.test/setup/{account_id}"))
    }

    async fn create_account_session(&self, account_id: &str) -> Result<String, PaymentPlatformError> {
        let ledger = self.enter("create_account_session")?;
        if !ledger.accounts.contains_key(account_id) {
            return Err(Self::unknown("account", account_id));
        }
        Ok(format!("accs_secret_{account_id}"))
    }

    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<PaymentIntentHandle, PaymentPlatformError> {
        let mut ledger = self.enter("create_payment_intent")?;
        ledger.intent_requests.push(request.clone());

        if let Some(existing) = ledger.idempotency.get(&request.idempotency_key) {
            if let Some((handle, _)) = ledger.intents.get(existing) {
                return Ok(handle.clone());
            }
        }

        let id = ledger.next_id("pi");
        let handle = PaymentIntentHandle {
            client_secret: format!("{id}_secret"),
            id: id.clone(),
            amount: request.amount,
            currency: request.currency,
        };
        ledger
            .intents
            .insert(id.clone(), (handle.clone(), PaymentIntentStatus::RequiresPaymentMethod));
        ledger.idempotency.insert(request.idempotency_key, id);
        Ok(handle)
    }

    async fn retrieve_payment_intent(
        &self,
        _account_id: &str,
        intent_id: &str,
    ) -> Result<PaymentIntentStatus, PaymentPlatformError> {
        let ledger = self.enter("retrieve_payment_intent")?;
        ledger
            .intents
            .get(intent_id)
            .map(|(_, status)| *status)
            .ok_or_else(|| Self::unknown("payment_intent", intent_id))
    }

    async fn cancel_payment_intent(
        &self,
        _account_id: &str,
        intent_id: &str,
    ) -> Result<(), PaymentPlatformError> {
        let mut ledger = self.enter("cancel_payment_intent")?;
        let Some((_, status)) = ledger.intents.get_mut(intent_id) else {
            return Err(Self::unknown("payment_intent", intent_id));
        };
        *status = PaymentIntentStatus::Canceled;
        ledger.cancelled.push(intent_id.to_string());
        Ok(())
    }

    async fn create_product_with_price(
        &self,
        request: ProductRequest,
    ) -> Result<CreatedProduct, PaymentPlatformError> {
        let mut ledger = self.enter("create_product_with_price")?;
        ledger.products.push(request);
        Ok(CreatedProduct {
            product_id: ledger.next_id("prod"),
            price_id: ledger.next_id("price"),
        })
    }
}

// ============================================================================
// Identity
// ============================================================================

/// [`IdentityProvider`] backed by a fixed token table
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    users: Mutex<HashMap<String, AuthUser>>,
}

impl StaticIdentityProvider {
    /// Create a provider that knows no tokens
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as `user`
    #[must_use]
    pub fn with_user(self, token: &str, user: AuthUser) -> Self {
        lock(&self.users).insert(token.to_string(), user);
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(&self, token: &str) -> Result<AuthUser, IdentityError> {
        lock(&self.users)
            .get(token)
            .cloned()
            .ok_or(IdentityError::Unauthenticated)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Guest used across tests
#[must_use]
pub fn sample_guest() -> GuestInfo {
    GuestInfo {
        name: "Ada Guest".to_string(),
        email: "ada@example.test".to_string(),
        phone: Some("+15550100".to_string()),
    }
}

/// A one-line quote over `cents`
#[must_use]
pub fn sample_quote(cents: u64) -> Quote {
    Quote {
        lines: vec![QuoteLine {
            product_id: ProductId::new(),
            name: "Court rental".to_string(),
            quantity: 1,
            amount: Money::from_cents(cents),
        }],
        total: Money::from_cents(cents),
        currency: "usd".to_string(),
    }
}

/// A freshly initiated 90-minute reservation for 75.00 on court 1
#[must_use]
pub fn sample_reservation() -> Reservation {
    let created_at = Utc
        .with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default();
    let start_time = created_at + ChronoDuration::hours(42);
    let tenant_id = TenantId::new();
    Reservation {
        id: ReservationId::new(),
        tenant_id,
        merchant_account_id: "acct_test".to_string(),
        slot: SlotKey {
            tenant_id,
            court_number: 1,
            start_time,
        },
        end_time: start_time + ChronoDuration::minutes(90),
        guest: sample_guest(),
        quote: sample_quote(7500),
        stage: ReservationStage::Initiated,
        payment_intent: None,
        booking_id: None,
        last_error: None,
        created_at,
        updated_at: created_at,
        expires_at: created_at + ChronoDuration::minutes(10),
    }
}

/// The intent the mock platform would create for `reservation`
#[must_use]
pub fn sample_intent(reservation: &Reservation) -> PaymentIntentHandle {
    PaymentIntentHandle {
        id: format!("pi_{}", reservation.id.as_uuid().simple()),
        client_secret: "pi_secret_test".to_string(),
        amount: reservation.quote.total,
        currency: reservation.quote.currency.clone(),
    }
}

/// A tenant with a connected merchant account
#[must_use]
pub fn sample_tenant(owner_id: UserId) -> Tenant {
    Tenant {
        id: TenantId::new(),
        name: "Riverside Padel".to_string(),
        owner_id,
        email: Some("owner@example.test".to_string()),
        stripe_account_id: Some("acct_test".to_string()),
    }
}

/// Reservation environment over the given platforms.
///
/// Holds last ten minutes; releases retry twice with millisecond backoff.
#[must_use]
pub fn test_environment(
    api: Arc<dyn CourtDataApi>,
    platform: Arc<dyn PaymentPlatform>,
    clock: Arc<dyn Clock>,
) -> ReservationEnvironment {
    ReservationEnvironment {
        availability: AvailabilityAccessor::new(api.clone()),
        payment_intents: PaymentIntentRequester::new(platform),
        bookings: BookingWriter::new(api.clone(), clock.clone()),
        ledger: IntentLedger::new(api),
        clock,
        hold_ttl: Duration::from_secs(600),
        release_retry: RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .build(),
    }
}
