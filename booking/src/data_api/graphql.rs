//! [`CourtDataApi`] over the hosted database's GraphQL endpoint.
//!
//! The endpoint exposes each table as `<table>Collection` for reads and
//! `update<table>Collection` / `insertInto<table>Collection` for writes.
//! `BigInt` and `JSON` columns travel as strings.

use super::{CourtDataApi, DataApiError};
use crate::config::DataApiConfig;
use crate::types::{
    Availability, AvailabilityStatus, Booking, BookingId, Court, GuestInfo, Money, PaymentStatus,
    PricingModel, Product, ProductId, ProductKind, Reservation, ReservationId, ReservationStage,
    SlotKey, Tenant, TenantId, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

/// GraphQL Data API client
#[derive(Clone)]
pub struct GraphQlDataApi {
    client: Client,
    url: String,
    api_key: String,
}

impl std::fmt::Debug for GraphQlDataApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphQlDataApi")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl GraphQlDataApi {
    /// Create a client for the configured endpoint
    ///
    /// # Errors
    ///
    /// Returns [`DataApiError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: &DataApiConfig) -> Result<Self, DataApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| DataApiError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        query: &'static str,
        variables: Value,
    ) -> Result<T, DataApiError> {
        let response = self
            .client
            .post(&self.url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| DataApiError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DataApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: GraphQlResponse<T> = response
            .json()
            .await
            .map_err(|e| DataApiError::Decode(e.to_string()))?;

        if let Some(errors) = body.errors.filter(|e| !e.is_empty()) {
            let message = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(DataApiError::GraphQl(message));
        }

        body.data
            .ok_or_else(|| DataApiError::Decode("response has neither data nor errors".into()))
    }

    async fn rows<N: DeserializeOwned>(
        &self,
        query: &'static str,
        variables: Value,
    ) -> Result<Vec<N>, DataApiError> {
        let data: Rows<N> = self.execute(query, variables).await?;
        Ok(data.rows.edges.into_iter().map(|e| e.node).collect())
    }

    async fn affected(&self, query: &'static str, variables: Value) -> Result<u64, DataApiError> {
        let data: Mutation = self.execute(query, variables).await?;
        Ok(data.result.affected_count)
    }
}

// ============================================================================
// Wire envelope
// ============================================================================

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlErrorMessage>>,
}

#[derive(Deserialize)]
struct GraphQlErrorMessage {
    message: String,
}

#[derive(Deserialize)]
struct Rows<N> {
    rows: Connection<N>,
}

#[derive(Deserialize)]
struct Connection<N> {
    edges: Vec<Edge<N>>,
}

#[derive(Deserialize)]
struct Edge<N> {
    node: N,
}

#[derive(Deserialize)]
struct Mutation {
    result: Affected,
}

#[derive(Deserialize)]
struct Affected {
    #[serde(rename = "affectedCount")]
    affected_count: u64,
}

/// `BigInt` columns arrive as strings
fn big_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// `JSON` columns arrive as encoded strings
fn json_column<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Value, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => serde_json::from_str(&s).map_err(serde::de::Error::custom),
        other => Ok(other),
    }
}

fn encode_json<T: Serialize>(value: &T) -> Result<String, DataApiError> {
    serde_json::to_string(value).map_err(|e| DataApiError::Decode(e.to_string()))
}

// ============================================================================
// Rows
// ============================================================================

#[derive(Deserialize)]
struct CompanyRow {
    id: TenantId,
    name: String,
    owner_id: UserId,
    email: Option<String>,
    stripe_account_id: Option<String>,
}

impl From<CompanyRow> for Tenant {
    fn from(row: CompanyRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            owner_id: row.owner_id,
            email: row.email,
            stripe_account_id: row.stripe_account_id,
        }
    }
}

#[derive(Deserialize)]
struct CourtRow {
    company_id: TenantId,
    court_number: u32,
    name: String,
}

#[derive(Serialize, Deserialize)]
struct AvailabilityRow {
    company_id: TenantId,
    court_number: u32,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    status: AvailabilityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    held_by: Option<ReservationId>,
}

impl From<AvailabilityRow> for Availability {
    fn from(row: AvailabilityRow) -> Self {
        Self {
            tenant_id: row.company_id,
            court_number: row.court_number,
            start_time: row.start_time,
            end_time: row.end_time,
            status: row.status,
            held_by: row.held_by,
        }
    }
}

impl From<&Availability> for AvailabilityRow {
    fn from(slot: &Availability) -> Self {
        Self {
            company_id: slot.tenant_id,
            court_number: slot.court_number,
            start_time: slot.start_time,
            end_time: slot.end_time,
            status: slot.status,
            held_by: slot.held_by,
        }
    }
}

#[derive(Deserialize)]
struct BookingRow {
    id: BookingId,
    company_id: TenantId,
    court_number: u32,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    customer_name: String,
    customer_email: String,
    customer_phone: Option<String>,
    payment_status: PaymentStatus,
    payment_intent_id: String,
    #[serde(deserialize_with = "big_int")]
    amount: u64,
    #[serde(deserialize_with = "json_column", default)]
    metadata: Value,
    created_at: DateTime<Utc>,
}

impl From<BookingRow> for Booking {
    fn from(row: BookingRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.company_id,
            court_number: row.court_number,
            start_time: row.start_time,
            end_time: row.end_time,
            guest: GuestInfo {
                name: row.customer_name,
                email: row.customer_email,
                phone: row.customer_phone,
            },
            payment_status: row.payment_status,
            payment_intent_id: row.payment_intent_id,
            amount: Money::from_cents(row.amount),
            metadata: row.metadata,
            created_at: row.created_at,
        }
    }
}

fn booking_input(booking: &Booking) -> Result<Value, DataApiError> {
    Ok(json!({
        "id": booking.id,
        "company_id": booking.tenant_id,
        "court_number": booking.court_number,
        "start_time": booking.start_time,
        "end_time": booking.end_time,
        "customer_name": booking.guest.name,
        "customer_email": booking.guest.email,
        "customer_phone": booking.guest.phone,
        "payment_status": booking.payment_status.as_str(),
        "payment_intent_id": booking.payment_intent_id,
        "amount": booking.amount.cents().to_string(),
        "metadata": encode_json(&booking.metadata)?,
        "created_at": booking.created_at,
    }))
}

#[derive(Deserialize)]
struct ProductRow {
    id: ProductId,
    company_id: TenantId,
    name: String,
    #[serde(rename = "type")]
    kind: ProductKind,
    pricing_type: String,
    #[serde(deserialize_with = "big_int")]
    price: u64,
    stripe_product_id: Option<String>,
    stripe_price_id: Option<String>,
    is_active: bool,
}

impl TryFrom<ProductRow> for Product {
    type Error = DataApiError;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let amount = Money::from_cents(row.price);
        let pricing = match row.pricing_type.as_str() {
            "hourly" => PricingModel::Hourly { rate: amount },
            "flat" => PricingModel::Flat { price: amount },
            other => {
                return Err(DataApiError::Decode(format!(
                    "product {} has unknown pricing type '{other}'",
                    row.id
                )));
            },
        };

        Ok(Self {
            id: row.id,
            tenant_id: row.company_id,
            name: row.name,
            kind: row.kind,
            pricing,
            stripe_product_id: row.stripe_product_id,
            stripe_price_id: row.stripe_price_id,
            active: row.is_active,
        })
    }
}

fn product_input(product: &Product) -> Value {
    let (pricing_type, price) = match product.pricing {
        PricingModel::Hourly { rate } => ("hourly", rate),
        PricingModel::Flat { price } => ("flat", price),
    };
    json!({
        "id": product.id,
        "company_id": product.tenant_id,
        "name": product.name,
        "type": product.kind,
        "pricing_type": pricing_type,
        "price": price.cents().to_string(),
        "stripe_product_id": product.stripe_product_id,
        "stripe_price_id": product.stripe_price_id,
        "is_active": product.active,
    })
}

#[derive(Deserialize)]
struct ReservationRow {
    #[serde(deserialize_with = "json_column")]
    record: Value,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = DataApiError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        serde_json::from_value(row.record).map_err(|e| DataApiError::Decode(e.to_string()))
    }
}

fn reservation_input(reservation: &Reservation) -> Result<Value, DataApiError> {
    Ok(json!({
        "id": reservation.id,
        "company_id": reservation.tenant_id,
        "stage": reservation.stage.as_str(),
        "expires_at": reservation.expires_at,
        "updated_at": reservation.updated_at,
        "record": encode_json(reservation)?,
    }))
}

// ============================================================================
// Queries
// ============================================================================

const GET_TENANT: &str = r"
query GetTenant($id: UUID!) {
  rows: companiesCollection(filter: { id: { eq: $id } }, first: 1) {
    edges { node { id name owner_id email stripe_account_id } }
  }
}";

const SET_TENANT_ACCOUNT: &str = r"
mutation SetTenantAccount($id: UUID!, $account: String!) {
  result: updatecompaniesCollection(
    set: { stripe_account_id: $account }
    filter: { id: { eq: $id } }
    atMost: 1
  ) { affectedCount }
}";

const GET_COURT: &str = r"
query GetCourt($company: UUID!, $court: Int!) {
  rows: courtsCollection(
    filter: { company_id: { eq: $company }, court_number: { eq: $court } }
    first: 1
  ) {
    edges { node { company_id court_number name } }
  }
}";

const HOLD_AVAILABILITY: &str = r"
mutation HoldAvailability(
  $company: UUID!, $court: Int!, $start: Datetime!, $expected: String!, $status: String!,
  $holder: UUID!
) {
  result: updatecourt_availabilitiesCollection(
    set: { status: $status, held_by: $holder }
    filter: {
      company_id: { eq: $company }
      court_number: { eq: $court }
      start_time: { eq: $start }
      status: { eq: $expected }
    }
    atMost: 1
  ) { affectedCount }
}";

const UPDATE_HELD_AVAILABILITY: &str = r"
mutation UpdateHeldAvailability(
  $company: UUID!, $court: Int!, $start: Datetime!, $expected: String!, $status: String!,
  $holder: UUID!, $heldBy: UUID
) {
  result: updatecourt_availabilitiesCollection(
    set: { status: $status, held_by: $heldBy }
    filter: {
      company_id: { eq: $company }
      court_number: { eq: $court }
      start_time: { eq: $start }
      status: { eq: $expected }
      held_by: { eq: $holder }
    }
    atMost: 1
  ) { affectedCount }
}";

const GET_AVAILABILITY: &str = r"
query GetAvailability($company: UUID!, $court: Int!, $start: Datetime!) {
  rows: court_availabilitiesCollection(
    filter: { company_id: { eq: $company }, court_number: { eq: $court }, start_time: { eq: $start } }
    first: 1
  ) {
    edges { node { company_id court_number start_time end_time status held_by } }
  }
}";

const LIST_AVAILABILITY: &str = r"
query ListAvailability($company: UUID!, $court: Int!, $from: Datetime!, $to: Datetime!) {
  rows: court_availabilitiesCollection(
    filter: {
      company_id: { eq: $company }
      court_number: { eq: $court }
      start_time: { gte: $from, lt: $to }
    }
    orderBy: [{ start_time: AscNullsLast }]
  ) {
    edges { node { company_id court_number start_time end_time status held_by } }
  }
}";

const INSERT_AVAILABILITY: &str = r"
mutation InsertAvailability($objects: [court_availabilitiesInsertInput!]!) {
  result: insertIntocourt_availabilitiesCollection(objects: $objects) { affectedCount }
}";

const GET_BOOKING: &str = r"
query GetBooking($company: UUID!, $id: UUID!) {
  rows: bookingsCollection(filter: { company_id: { eq: $company }, id: { eq: $id } }, first: 1) {
    edges {
      node {
        id company_id court_number start_time end_time
        customer_name customer_email customer_phone
        payment_status payment_intent_id amount metadata created_at
      }
    }
  }
}";

const INSERT_BOOKING: &str = r"
mutation InsertBooking($objects: [bookingsInsertInput!]!) {
  result: insertIntobookingsCollection(objects: $objects) { affectedCount }
}";

const LIST_PRODUCTS: &str = r"
query ListProducts($company: UUID!, $ids: [UUID!]!) {
  rows: productsCollection(filter: { company_id: { eq: $company }, id: { in: $ids } }) {
    edges {
      node {
        id company_id name type pricing_type price
        stripe_product_id stripe_price_id is_active
      }
    }
  }
}";

const INSERT_PRODUCT: &str = r"
mutation InsertProduct($objects: [productsInsertInput!]!) {
  result: insertIntoproductsCollection(objects: $objects) { affectedCount }
}";

const INSERT_RESERVATION: &str = r"
mutation InsertReservation($objects: [reservation_intentsInsertInput!]!) {
  result: insertIntoreservation_intentsCollection(objects: $objects) { affectedCount }
}";

const UPDATE_RESERVATION: &str = r"
mutation UpdateReservation(
  $id: UUID!, $stage: String!, $expires: Datetime!, $updated: Datetime!, $record: JSON!
) {
  result: updatereservation_intentsCollection(
    set: { stage: $stage, expires_at: $expires, updated_at: $updated, record: $record }
    filter: { id: { eq: $id } }
    atMost: 1
  ) { affectedCount }
}";

const GET_RESERVATION: &str = r"
query GetReservation($id: UUID!) {
  rows: reservation_intentsCollection(filter: { id: { eq: $id } }, first: 1) {
    edges { node { record } }
  }
}";

const LIST_STALE_RESERVATIONS: &str = r"
query ListStaleReservations($stages: [String!]!, $before: Datetime!) {
  rows: reservation_intentsCollection(
    filter: { stage: { in: $stages }, expires_at: { lt: $before } }
    orderBy: [{ expires_at: AscNullsLast }]
  ) {
    edges { node { record } }
  }
}";

const PING: &str = "query Ping { __typename }";

#[async_trait]
impl CourtDataApi for GraphQlDataApi {
    #[tracing::instrument(skip(self))]
    async fn get_tenant(&self, tenant_id: TenantId) -> Result<Option<Tenant>, DataApiError> {
        let rows: Vec<CompanyRow> = self.rows(GET_TENANT, json!({ "id": tenant_id })).await?;
        Ok(rows.into_iter().next().map(Tenant::from))
    }

    #[tracing::instrument(skip(self))]
    async fn set_tenant_stripe_account(
        &self,
        tenant_id: TenantId,
        account_id: &str,
    ) -> Result<(), DataApiError> {
        let affected = self
            .affected(
                SET_TENANT_ACCOUNT,
                json!({ "id": tenant_id, "account": account_id }),
            )
            .await?;
        if affected == 0 {
            return Err(DataApiError::GraphQl(format!("company {tenant_id} not found")));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_court(
        &self,
        tenant_id: TenantId,
        court_number: u32,
    ) -> Result<Option<Court>, DataApiError> {
        let rows: Vec<CourtRow> = self
            .rows(GET_COURT, json!({ "company": tenant_id, "court": court_number }))
            .await?;
        Ok(rows.into_iter().next().map(|row| Court {
            tenant_id: row.company_id,
            court_number: row.court_number,
            name: row.name,
        }))
    }

    #[tracing::instrument(skip(self), fields(slot = %slot))]
    async fn update_availability_status(
        &self,
        slot: &SlotKey,
        expected: AvailabilityStatus,
        new: AvailabilityStatus,
        holder: ReservationId,
    ) -> Result<u64, DataApiError> {
        let mut variables = json!({
            "company": slot.tenant_id,
            "court": slot.court_number,
            "start": slot.start_time,
            "expected": expected.as_str(),
            "status": new.as_str(),
            "holder": holder,
        });
        if expected != AvailabilityStatus::Held {
            return self.affected(HOLD_AVAILABILITY, variables).await;
        }

        let held_by = (new != AvailabilityStatus::Available).then_some(holder);
        variables["heldBy"] = json!(held_by);
        self.affected(UPDATE_HELD_AVAILABILITY, variables).await
    }

    #[tracing::instrument(skip(self), fields(slot = %slot))]
    async fn get_availability(&self, slot: &SlotKey) -> Result<Option<Availability>, DataApiError> {
        let rows: Vec<AvailabilityRow> = self
            .rows(
                GET_AVAILABILITY,
                json!({
                    "company": slot.tenant_id,
                    "court": slot.court_number,
                    "start": slot.start_time,
                }),
            )
            .await?;
        Ok(rows.into_iter().next().map(Availability::from))
    }

    #[tracing::instrument(skip(self))]
    async fn list_availability(
        &self,
        tenant_id: TenantId,
        court_number: u32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Availability>, DataApiError> {
        let rows: Vec<AvailabilityRow> = self
            .rows(
                LIST_AVAILABILITY,
                json!({ "company": tenant_id, "court": court_number, "from": from, "to": to }),
            )
            .await?;
        Ok(rows.into_iter().map(Availability::from).collect())
    }

    #[tracing::instrument(skip(self, slots), fields(count = slots.len()))]
    async fn insert_availability(&self, slots: &[Availability]) -> Result<(), DataApiError> {
        let objects: Vec<AvailabilityRow> = slots.iter().map(AvailabilityRow::from).collect();
        self.affected(INSERT_AVAILABILITY, json!({ "objects": objects }))
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_booking(
        &self,
        tenant_id: TenantId,
        booking_id: BookingId,
    ) -> Result<Option<Booking>, DataApiError> {
        let rows: Vec<BookingRow> = self
            .rows(GET_BOOKING, json!({ "company": tenant_id, "id": booking_id }))
            .await?;
        Ok(rows.into_iter().next().map(Booking::from))
    }

    #[tracing::instrument(skip(self, booking), fields(booking_id = %booking.id))]
    async fn insert_booking(&self, booking: &Booking) -> Result<(), DataApiError> {
        self.affected(INSERT_BOOKING, json!({ "objects": [booking_input(booking)?] }))
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
    async fn list_products(
        &self,
        tenant_id: TenantId,
        ids: &[ProductId],
    ) -> Result<Vec<Product>, DataApiError> {
        let rows: Vec<ProductRow> = self
            .rows(LIST_PRODUCTS, json!({ "company": tenant_id, "ids": ids }))
            .await?;
        rows.into_iter().map(Product::try_from).collect()
    }

    #[tracing::instrument(skip(self, product), fields(product_id = %product.id))]
    async fn insert_product(&self, product: &Product) -> Result<(), DataApiError> {
        self.affected(INSERT_PRODUCT, json!({ "objects": [product_input(product)] }))
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, reservation), fields(reservation_id = %reservation.id))]
    async fn insert_reservation(&self, reservation: &Reservation) -> Result<(), DataApiError> {
        self.affected(
            INSERT_RESERVATION,
            json!({ "objects": [reservation_input(reservation)?] }),
        )
        .await?;
        Ok(())
    }

    #[tracing::instrument(
        skip(self, reservation),
        fields(reservation_id = %reservation.id, stage = %reservation.stage)
    )]
    async fn update_reservation(&self, reservation: &Reservation) -> Result<(), DataApiError> {
        let affected = self
            .affected(
                UPDATE_RESERVATION,
                json!({
                    "id": reservation.id,
                    "stage": reservation.stage.as_str(),
                    "expires": reservation.expires_at,
                    "updated": reservation.updated_at,
                    "record": encode_json(reservation)?,
                }),
            )
            .await?;
        if affected == 0 {
            return Err(DataApiError::GraphQl(format!(
                "reservation intent {} not found",
                reservation.id
            )));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Reservation>, DataApiError> {
        let rows: Vec<ReservationRow> = self
            .rows(GET_RESERVATION, json!({ "id": reservation_id }))
            .await?;
        rows.into_iter().next().map(Reservation::try_from).transpose()
    }

    #[tracing::instrument(skip(self))]
    async fn list_stale_reservations(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, DataApiError> {
        let stages: Vec<&str> = ReservationStage::OPEN.iter().map(|s| s.as_str()).collect();
        let rows: Vec<ReservationRow> = self
            .rows(
                LIST_STALE_RESERVATIONS,
                json!({ "stages": stages, "before": before }),
            )
            .await?;
        rows.into_iter().map(Reservation::try_from).collect()
    }

    async fn ping(&self) -> Result<(), DataApiError> {
        let _: Value = self.execute(PING, json!({})).await?;
        Ok(())
    }
}
