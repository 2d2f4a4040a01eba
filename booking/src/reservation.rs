//! Reservation saga: hold, pay, confirm, release-on-failure.
//!
//! Orchestrates the booking workflow across the Data API and the payment
//! platform:
//! 1. Record the reservation intent (outbox), then hold the slot
//! 2. Request a payment intent on the tenant's merchant account; schedule
//!    hold expiry
//! 3. On payment intent failure: release the hold (compensation)
//! 4. On confirmation: write the `pending` booking, then mark the slot booked
//! 5. On expiry: release unpaid holds, roll paid ones forward
//!
//! The reducer holds no I/O. Each step is an effect whose outcome comes back
//! as an action; every action carries the reservation id, so concurrent
//! reservations never share mutable context.

use crate::availability::{AvailabilityAccessor, AvailabilityError};
use crate::booking_writer::BookingWriter;
use crate::error::ReservationError;
use crate::intents::IntentLedger;
use crate::metrics;
use crate::payment_intents::PaymentIntentRequester;
use crate::types::{
    BookingId, GuestInfo, PaymentIntentHandle, PaymentIntentStatus, Quote, Reservation,
    ReservationId, ReservationStage, SlotKey, TenantId,
};
use chrono::{DateTime, Utc};
use courtside_core::{
    SmallVec, async_effect, delay, effect::Effect, emit, environment::Clock, reducer::Reducer,
    smallvec,
};
use courtside_runtime::Store;
use courtside_runtime::retry::{RetryPolicy, retry_with_predicate};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Actions (Commands + Events)
// ============================================================================

/// Why a hold was released
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseCause {
    /// The payment intent could not be created
    PaymentIntentFailed,
    /// The hold lapsed without a paid confirmation
    Expired,
}

impl ReleaseCause {
    const fn as_str(self) -> &'static str {
        match self {
            Self::PaymentIntentFailed => "payment_intent_failed",
            Self::Expired => "expired",
        }
    }
}

/// Actions for the reservation saga
#[derive(Clone, Debug)]
pub enum ReservationAction {
    // Commands
    /// Reserve a slot and request payment
    ReserveSlot {
        /// Reservation ID (chosen by the caller)
        reservation_id: ReservationId,
        /// Tenant
        tenant_id: TenantId,
        /// Tenant's connected merchant account, if any
        merchant_account_id: Option<String>,
        /// Court
        court_number: u32,
        /// Slot start
        start_time: DateTime<Utc>,
        /// Slot end
        end_time: DateTime<Utc>,
        /// Guest contact details
        guest: GuestInfo,
        /// Price
        quote: Quote,
    },

    /// Write the booking and mark the slot booked
    ConfirmBooking {
        /// Reservation ID
        reservation_id: ReservationId,
        /// Tenant the caller addressed
        tenant_id: TenantId,
    },

    /// Resolve a reservation whose hold lapsed
    ExpireHold {
        /// Reservation ID
        reservation_id: ReservationId,
    },

    /// Track a reservation loaded from the intent ledger
    RestoreReservation {
        /// Persisted record
        reservation: Box<Reservation>,
    },

    /// Forget settled reservations last updated before `before`
    PruneSettled {
        /// Cutoff
        before: DateTime<Utc>,
    },

    // Events
    /// Intent record written
    IntentRecorded {
        /// Reservation ID
        reservation_id: ReservationId,
    },

    /// Intent record could not be written
    IntentRecordFailed {
        /// Reservation ID
        reservation_id: ReservationId,
        /// Upstream error
        error: String,
    },

    /// Slot moved to `held`
    SlotHeld {
        /// Reservation ID
        reservation_id: ReservationId,
    },

    /// Slot could not be held
    SlotHoldFailed {
        /// Reservation ID
        reservation_id: ReservationId,
        /// Reason
        error: ReservationError,
    },

    /// Payment intent created
    PaymentIntentCreated {
        /// Reservation ID
        reservation_id: ReservationId,
        /// Intent handle
        intent: PaymentIntentHandle,
    },

    /// Intent recorded on the reservation; the guest can pay
    PaymentRequested {
        /// Reservation ID
        reservation_id: ReservationId,
        /// Intent handle
        intent: PaymentIntentHandle,
        /// When the hold lapses
        expires_at: DateTime<Utc>,
    },

    /// Payment intent could not be created
    PaymentIntentFailed {
        /// Reservation ID
        reservation_id: ReservationId,
        /// Upstream error
        error: String,
    },

    /// Slot moved back to `available`
    HoldReleased {
        /// Reservation ID
        reservation_id: ReservationId,
        /// Why
        cause: ReleaseCause,
    },

    /// Slot could not be released after retries
    HoldReleaseFailed {
        /// Reservation ID
        reservation_id: ReservationId,
        /// Why the release was attempted
        cause: ReleaseCause,
        /// Upstream error
        error: String,
    },

    /// Payment intent status retrieved during expiry
    PaymentStatusChecked {
        /// Reservation ID
        reservation_id: ReservationId,
        /// Status on the payment platform
        status: PaymentIntentStatus,
    },

    /// Payment intent status could not be retrieved
    PaymentStatusCheckFailed {
        /// Reservation ID
        reservation_id: ReservationId,
        /// Upstream error
        error: String,
    },

    /// Booking row written
    BookingRecorded {
        /// Reservation ID
        reservation_id: ReservationId,
        /// Booking ID
        booking_id: BookingId,
    },

    /// Booking row could not be written
    BookingWriteFailed {
        /// Reservation ID
        reservation_id: ReservationId,
        /// Upstream error
        error: String,
    },

    /// Slot moved to `booked`
    SlotBooked {
        /// Reservation ID
        reservation_id: ReservationId,
    },

    /// Slot could not be marked booked; the booking exists
    SlotBookFailed {
        /// Reservation ID
        reservation_id: ReservationId,
        /// Upstream error
        error: String,
    },

    /// Reservation confirmed
    BookingConfirmed {
        /// Reservation ID
        reservation_id: ReservationId,
        /// Booking ID
        booking_id: BookingId,
    },

    /// Reservation or confirmation failed
    ReservationFailed {
        /// Reservation ID
        reservation_id: ReservationId,
        /// Reason
        error: ReservationError,
    },
}

impl ReservationAction {
    /// The reservation this action is about, if any
    #[must_use]
    pub const fn reservation_id(&self) -> Option<ReservationId> {
        match self {
            Self::ReserveSlot { reservation_id, .. }
            | Self::ConfirmBooking { reservation_id, .. }
            | Self::ExpireHold { reservation_id }
            | Self::IntentRecorded { reservation_id }
            | Self::IntentRecordFailed { reservation_id, .. }
            | Self::SlotHeld { reservation_id }
            | Self::SlotHoldFailed { reservation_id, .. }
            | Self::PaymentIntentCreated { reservation_id, .. }
            | Self::PaymentRequested { reservation_id, .. }
            | Self::PaymentIntentFailed { reservation_id, .. }
            | Self::HoldReleased { reservation_id, .. }
            | Self::HoldReleaseFailed { reservation_id, .. }
            | Self::PaymentStatusChecked { reservation_id, .. }
            | Self::PaymentStatusCheckFailed { reservation_id, .. }
            | Self::BookingRecorded { reservation_id, .. }
            | Self::BookingWriteFailed { reservation_id, .. }
            | Self::SlotBooked { reservation_id }
            | Self::SlotBookFailed { reservation_id, .. }
            | Self::BookingConfirmed { reservation_id, .. }
            | Self::ReservationFailed { reservation_id, .. } => Some(*reservation_id),
            Self::RestoreReservation { reservation } => Some(reservation.id),
            Self::PruneSettled { .. } => None,
        }
    }

    /// Whether this action answers a `ReserveSlot` for `id`
    #[must_use]
    pub fn settles_reserve(&self, id: ReservationId) -> bool {
        matches!(
            self,
            Self::PaymentRequested { reservation_id, .. }
            | Self::ReservationFailed { reservation_id, .. } if *reservation_id == id
        )
    }

    /// Whether this action answers a `ConfirmBooking` for `id`
    #[must_use]
    pub fn settles_confirm(&self, id: ReservationId) -> bool {
        matches!(
            self,
            Self::BookingConfirmed { reservation_id, .. }
            | Self::SlotBookFailed { reservation_id, .. }
            | Self::ReservationFailed { reservation_id, .. } if *reservation_id == id
        )
    }
}

// ============================================================================
// State
// ============================================================================

/// In-process state of the saga
#[derive(Clone, Debug, Default)]
pub struct ReservationState {
    /// Reservations by id
    pub reservations: HashMap<ReservationId, Reservation>,
    /// Slots with an open reservation in this process
    pub active_slots: HashMap<SlotKey, ReservationId>,
    /// Reservations with a confirmation or expiry in flight
    pub busy: HashSet<ReservationId>,
}

impl ReservationState {
    /// Look up a reservation
    #[must_use]
    pub fn get(&self, id: &ReservationId) -> Option<&Reservation> {
        self.reservations.get(id)
    }

    /// Whether the reservation is tracked in this process
    #[must_use]
    pub fn contains(&self, id: &ReservationId) -> bool {
        self.reservations.contains_key(id)
    }

    fn free_slot(&mut self, reservation: &Reservation) {
        if self.active_slots.get(&reservation.slot) == Some(&reservation.id) {
            self.active_slots.remove(&reservation.slot);
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the reservation saga
#[derive(Clone)]
pub struct ReservationEnvironment {
    /// Availability rows
    pub availability: AvailabilityAccessor,
    /// Payment intents
    pub payment_intents: PaymentIntentRequester,
    /// Booking rows
    pub bookings: BookingWriter,
    /// Intent records
    pub ledger: IntentLedger,
    /// Clock for timestamps and expiry
    pub clock: Arc<dyn Clock>,
    /// How long a hold lasts without confirmation
    pub hold_ttl: Duration,
    /// Retry policy for releasing holds
    pub release_retry: RetryPolicy,
}

impl ReservationEnvironment {
    fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.hold_ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

// ============================================================================
// Effects
// ============================================================================

type Effects = SmallVec<[Effect<ReservationAction>; 4]>;

fn fail(reservation_id: ReservationId, error: ReservationError) -> Effects {
    smallvec![emit!(ReservationAction::ReservationFailed {
        reservation_id,
        error
    })]
}

fn record_intent(env: &ReservationEnvironment, reservation: Reservation) -> Effect<ReservationAction> {
    let ledger = env.ledger.clone();
    async_effect! {
        let reservation_id = reservation.id;
        match ledger.record(&reservation).await {
            Ok(()) => Some(ReservationAction::IntentRecorded { reservation_id }),
            Err(e) => Some(ReservationAction::IntentRecordFailed {
                reservation_id,
                error: e.to_string(),
            }),
        }
    }
}

fn hold_slot(env: &ReservationEnvironment, reservation: &Reservation) -> Effect<ReservationAction> {
    let availability = env.availability.clone();
    let reservation_id = reservation.id;
    let slot = reservation.slot.clone();
    async_effect! {
        match availability.hold(&slot, reservation_id).await {
            Ok(()) => Some(ReservationAction::SlotHeld { reservation_id }),
            Err(AvailabilityError::SlotUnavailable(_)) => Some(ReservationAction::SlotHoldFailed {
                reservation_id,
                error: ReservationError::SlotUnavailable,
            }),
            Err(e) => Some(ReservationAction::SlotHoldFailed {
                reservation_id,
                error: ReservationError::Upstream(e.to_string()),
            }),
        }
    }
}

fn request_payment_intent(
    env: &ReservationEnvironment,
    reservation: Reservation,
) -> Effect<ReservationAction> {
    let ledger = env.ledger.clone();
    let requester = env.payment_intents.clone();
    async_effect! {
        ledger.save_or_log(&reservation).await;
        let reservation_id = reservation.id;
        match requester.request(&reservation).await {
            Ok(intent) => Some(ReservationAction::PaymentIntentCreated { reservation_id, intent }),
            Err(e) => Some(ReservationAction::PaymentIntentFailed {
                reservation_id,
                error: e.to_string(),
            }),
        }
    }
}

/// Release with bounded retry. Transport/API failures are retried; a slot
/// that is no longer held has nothing to release.
fn release_hold(
    env: &ReservationEnvironment,
    reservation: &Reservation,
    cause: ReleaseCause,
    cancel_intent: bool,
) -> Effect<ReservationAction> {
    let availability = env.availability.clone();
    let requester = env.payment_intents.clone();
    let policy = env.release_retry.clone();
    let reservation = reservation.clone();
    async_effect! {
        let reservation_id = reservation.id;

        if cancel_intent {
            if let Some(intent) = &reservation.payment_intent {
                if let Err(error) = requester.cancel(&reservation, intent).await {
                    tracing::warn!(%reservation_id, intent_id = %intent.id, %error, "Failed to cancel payment intent");
                }
            }
        }

        let slot = reservation.slot.clone();
        let result = retry_with_predicate(
            policy,
            || {
                let availability = availability.clone();
                let slot = slot.clone();
                async move { availability.release(&slot, reservation_id).await }
            },
            |e| matches!(e, AvailabilityError::Upstream(_)),
        )
        .await;

        match result {
            Ok(()) => Some(ReservationAction::HoldReleased { reservation_id, cause }),
            Err(AvailabilityError::StatusConflict { .. }) => {
                tracing::warn!(%reservation_id, slot = %slot, "Slot was not held at release time");
                Some(ReservationAction::HoldReleased { reservation_id, cause })
            },
            Err(e) => Some(ReservationAction::HoldReleaseFailed {
                reservation_id,
                cause,
                error: e.to_string(),
            }),
        }
    }
}

fn check_payment_status(
    env: &ReservationEnvironment,
    reservation: &Reservation,
    intent: PaymentIntentHandle,
) -> Effect<ReservationAction> {
    let requester = env.payment_intents.clone();
    let reservation = reservation.clone();
    async_effect! {
        let reservation_id = reservation.id;
        match requester.status(&reservation, &intent).await {
            Ok(status) => Some(ReservationAction::PaymentStatusChecked { reservation_id, status }),
            Err(e) => Some(ReservationAction::PaymentStatusCheckFailed {
                reservation_id,
                error: e.to_string(),
            }),
        }
    }
}

fn write_booking(
    env: &ReservationEnvironment,
    reservation: &Reservation,
    intent: PaymentIntentHandle,
) -> Effect<ReservationAction> {
    let writer = env.bookings.clone();
    let reservation = reservation.clone();
    async_effect! {
        let reservation_id = reservation.id;
        match writer.write_pending(&reservation, &intent).await {
            Ok(booking_id) => Some(ReservationAction::BookingRecorded { reservation_id, booking_id }),
            Err(e) => Some(ReservationAction::BookingWriteFailed {
                reservation_id,
                error: e.to_string(),
            }),
        }
    }
}

fn book_slot(
    env: &ReservationEnvironment,
    reservation: &Reservation,
    save_first: bool,
) -> Effect<ReservationAction> {
    let ledger = env.ledger.clone();
    let availability = env.availability.clone();
    let reservation = reservation.clone();
    async_effect! {
        if save_first {
            ledger.save_or_log(&reservation).await;
        }
        let reservation_id = reservation.id;
        match availability.book(&reservation.slot, reservation_id).await {
            Ok(()) => Some(ReservationAction::SlotBooked { reservation_id }),
            Err(e) => Some(ReservationAction::SlotBookFailed {
                reservation_id,
                error: e.to_string(),
            }),
        }
    }
}

fn save(env: &ReservationEnvironment, reservation: &Reservation) -> Effect<ReservationAction> {
    let ledger = env.ledger.clone();
    let reservation = reservation.clone();
    async_effect! {
        ledger.save_or_log(&reservation).await;
        None
    }
}

fn save_then(
    env: &ReservationEnvironment,
    reservation: &Reservation,
    then: ReservationAction,
) -> Effect<ReservationAction> {
    let ledger = env.ledger.clone();
    let reservation = reservation.clone();
    async_effect! {
        ledger.save_or_log(&reservation).await;
        Some(then)
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the reservation saga
#[derive(Clone, Debug, Default)]
pub struct ReservationReducer;

impl ReservationReducer {
    /// Creates a new `ReservationReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn validate_reserve(
        state: &ReservationState,
        reservation_id: ReservationId,
        merchant_account_id: Option<&String>,
        slot: &SlotKey,
        end_time: DateTime<Utc>,
        quote: &Quote,
    ) -> Result<(), ReservationError> {
        if state.contains(&reservation_id) {
            return Err(ReservationError::InvalidState(format!(
                "reservation {reservation_id} already exists"
            )));
        }
        if merchant_account_id.is_none_or(|id| id.trim().is_empty()) {
            return Err(ReservationError::NotConnected);
        }
        if end_time <= slot.start_time {
            return Err(ReservationError::Validation(
                "booking must end after it starts".to_string(),
            ));
        }
        if quote.total.is_zero() {
            return Err(ReservationError::Validation(
                "amount must be positive".to_string(),
            ));
        }
        if state.active_slots.contains_key(slot) {
            return Err(ReservationError::SlotUnavailable);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn reserve(
        state: &mut ReservationState,
        env: &ReservationEnvironment,
        reservation_id: ReservationId,
        tenant_id: TenantId,
        merchant_account_id: Option<String>,
        slot: SlotKey,
        end_time: DateTime<Utc>,
        guest: GuestInfo,
        quote: Quote,
    ) -> Effects {
        if let Err(error) = Self::validate_reserve(
            state,
            reservation_id,
            merchant_account_id.as_ref(),
            &slot,
            end_time,
            &quote,
        ) {
            tracing::info!(%reservation_id, %error, "Reservation rejected");
            return fail(reservation_id, error);
        }

        let now = env.clock.now();
        let reservation = Reservation {
            id: reservation_id,
            tenant_id,
            merchant_account_id: merchant_account_id.unwrap_or_default(),
            slot: slot.clone(),
            end_time,
            guest,
            quote,
            stage: ReservationStage::Initiated,
            payment_intent: None,
            booking_id: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            expires_at: env.expires_at(now),
        };

        tracing::info!(%reservation_id, %slot, amount = reservation.quote.total.cents(), "Reservation initiated");
        state.active_slots.insert(slot, reservation_id);
        state.reservations.insert(reservation_id, reservation.clone());

        smallvec![record_intent(env, reservation)]
    }

    fn confirm(
        state: &mut ReservationState,
        env: &ReservationEnvironment,
        reservation_id: ReservationId,
        tenant_id: TenantId,
    ) -> Effects {
        let Some(reservation) = state
            .reservations
            .get(&reservation_id)
            .filter(|r| r.tenant_id == tenant_id)
        else {
            return fail(reservation_id, ReservationError::NotFound);
        };

        if state.busy.contains(&reservation_id) {
            return fail(
                reservation_id,
                ReservationError::InvalidState("reservation is being processed".to_string()),
            );
        }

        match (reservation.stage, reservation.payment_intent.clone()) {
            (ReservationStage::Confirmed, _) => {
                let booking_id = reservation
                    .booking_id
                    .unwrap_or_else(|| BookingId::for_reservation(reservation_id));
                smallvec![emit!(ReservationAction::BookingConfirmed {
                    reservation_id,
                    booking_id
                })]
            },
            (ReservationStage::Released | ReservationStage::Failed, _) => {
                fail(reservation_id, ReservationError::Expired)
            },
            (ReservationStage::AwaitingPayment, Some(intent)) => {
                let effect = write_booking(env, reservation, intent);
                state.busy.insert(reservation_id);
                smallvec![effect]
            },
            (ReservationStage::BookingRecorded, _) => {
                let effect = book_slot(env, reservation, false);
                state.busy.insert(reservation_id);
                smallvec![effect]
            },
            (stage, _) => fail(
                reservation_id,
                ReservationError::InvalidState(format!(
                    "reservation is {stage}; payment has not been requested"
                )),
            ),
        }
    }

    fn expire(
        state: &mut ReservationState,
        env: &ReservationEnvironment,
        reservation_id: ReservationId,
    ) -> Effects {
        let now = env.clock.now();
        let Some(reservation) = state.reservations.get_mut(&reservation_id) else {
            tracing::debug!(%reservation_id, "Expiry for unknown reservation ignored");
            return SmallVec::new();
        };

        if reservation.stage.is_terminal()
            || state.busy.contains(&reservation_id)
            || now < reservation.expires_at
        {
            return SmallVec::new();
        }

        tracing::info!(%reservation_id, stage = %reservation.stage, "Hold expired");

        let effect = match (reservation.stage, reservation.payment_intent.clone()) {
            // The hold may have landed without being recorded; the release
            // only matches a slot this reservation holds
            (ReservationStage::Initiated | ReservationStage::Held, _)
            | (ReservationStage::AwaitingPayment, None) => {
                release_hold(env, reservation, ReleaseCause::Expired, false)
            },
            (ReservationStage::AwaitingPayment, Some(intent)) => {
                check_payment_status(env, reservation, intent)
            },
            (ReservationStage::BookingRecorded, _) => book_slot(env, reservation, false),
            (ReservationStage::Confirmed | ReservationStage::Released | ReservationStage::Failed, _) => {
                return SmallVec::new();
            },
        };

        state.busy.insert(reservation_id);
        smallvec![effect]
    }

    #[allow(clippy::too_many_lines)]
    fn apply_outcome(
        state: &mut ReservationState,
        env: &ReservationEnvironment,
        action: ReservationAction,
    ) -> Effects {
        let now = env.clock.now();
        let Some(reservation_id) = action.reservation_id() else {
            return SmallVec::new();
        };
        let Some(reservation) = state.reservations.get_mut(&reservation_id) else {
            tracing::debug!(%reservation_id, ?action, "Outcome for unknown reservation ignored");
            return SmallVec::new();
        };

        match action {
            ReservationAction::IntentRecorded { .. } => {
                smallvec![hold_slot(env, reservation)]
            },

            ReservationAction::IntentRecordFailed { error, .. } => {
                tracing::error!(%reservation_id, %error, "Failed to record reservation intent");
                reservation.last_error = Some(error.clone());
                reservation.advance(ReservationStage::Failed, now);
                let reservation = reservation.clone();
                state.free_slot(&reservation);
                fail(reservation_id, ReservationError::Upstream(error))
            },

            ReservationAction::SlotHeld { .. } => {
                // Resolved, or an expiry release is already running
                if reservation.stage != ReservationStage::Initiated
                    || state.busy.contains(&reservation_id)
                {
                    tracing::warn!(%reservation_id, stage = %reservation.stage, "Hold landed after the reservation was resolved, releasing");
                    return smallvec![release_hold(env, reservation, ReleaseCause::Expired, false)];
                }
                reservation.advance(ReservationStage::Held, now);
                tracing::info!(%reservation_id, slot = %reservation.slot, "Slot held");
                smallvec![
                    request_payment_intent(env, reservation.clone()),
                    delay! {
                        duration: env.hold_ttl,
                        action: ReservationAction::ExpireHold { reservation_id }
                    }
                ]
            },

            ReservationAction::SlotHoldFailed { error, .. } => {
                tracing::info!(%reservation_id, %error, "Slot hold failed");
                reservation.last_error = Some(error.to_string());
                reservation.advance(ReservationStage::Failed, now);
                let reservation = reservation.clone();
                state.free_slot(&reservation);
                smallvec![save_then(
                    env,
                    &reservation,
                    ReservationAction::ReservationFailed {
                        reservation_id,
                        error
                    }
                )]
            },

            ReservationAction::PaymentIntentCreated { intent, .. } => {
                if reservation.stage != ReservationStage::Held {
                    // Hold already resolved; the intent must not be paid
                    tracing::warn!(%reservation_id, stage = %reservation.stage, intent_id = %intent.id, "Cancelling orphaned payment intent");
                    let requester = env.payment_intents.clone();
                    let reservation = reservation.clone();
                    return smallvec![
                        async_effect! {
                            if let Err(error) = requester.cancel(&reservation, &intent).await {
                                tracing::warn!(%reservation_id, %error, "Failed to cancel orphaned payment intent");
                            }
                            None
                        },
                        emit!(ReservationAction::ReservationFailed {
                            reservation_id,
                            error: ReservationError::Expired
                        })
                    ];
                }

                metrics::record_payment_requested(intent.amount.cents());

                reservation.payment_intent = Some(intent.clone());
                reservation.advance(ReservationStage::AwaitingPayment, now);
                let expires_at = reservation.expires_at;
                smallvec![save_then(
                    env,
                    reservation,
                    ReservationAction::PaymentRequested {
                        reservation_id,
                        intent,
                        expires_at
                    }
                )]
            },

            ReservationAction::PaymentRequested { .. } => SmallVec::new(),

            ReservationAction::PaymentIntentFailed { error, .. } => {
                tracing::warn!(%reservation_id, %error, "Payment intent failed, releasing hold");
                reservation.last_error = Some(error);
                state.busy.insert(reservation_id);
                smallvec![release_hold(
                    env,
                    reservation,
                    ReleaseCause::PaymentIntentFailed,
                    false
                )]
            },

            ReservationAction::HoldReleased { cause, .. } => {
                metrics::record_hold_released(cause.as_str());
                tracing::info!(%reservation_id, cause = cause.as_str(), "Hold released");
                reservation.advance(ReservationStage::Released, now);
                let reservation = reservation.clone();
                state.free_slot(&reservation);
                state.busy.remove(&reservation_id);

                match cause {
                    ReleaseCause::PaymentIntentFailed => {
                        let error = ReservationError::Upstream(
                            reservation
                                .last_error
                                .clone()
                                .unwrap_or_else(|| "payment intent failed".to_string()),
                        );
                        smallvec![save_then(
                            env,
                            &reservation,
                            ReservationAction::ReservationFailed {
                                reservation_id,
                                error
                            }
                        )]
                    },
                    ReleaseCause::Expired => smallvec![save(env, &reservation)],
                }
            },

            ReservationAction::HoldReleaseFailed { cause, error, .. } => {
                tracing::error!(%reservation_id, %error, "Failed to release hold; left for reconciliation");
                state.busy.remove(&reservation_id);
                match cause {
                    ReleaseCause::PaymentIntentFailed => {
                        let upstream = reservation.last_error.clone().unwrap_or(error);
                        fail(reservation_id, ReservationError::Upstream(upstream))
                    },
                    ReleaseCause::Expired => {
                        reservation.last_error = Some(error);
                        SmallVec::new()
                    },
                }
            },

            ReservationAction::PaymentStatusChecked { status, .. } => {
                let Some(intent) = reservation.payment_intent.clone() else {
                    state.busy.remove(&reservation_id);
                    return SmallVec::new();
                };
                if status.is_paid_or_processing() {
                    tracing::info!(%reservation_id, ?status, "Expired hold is paid, rolling forward");
                    smallvec![write_booking(env, reservation, intent)]
                } else {
                    smallvec![release_hold(env, reservation, ReleaseCause::Expired, true)]
                }
            },

            ReservationAction::PaymentStatusCheckFailed { error, .. } => {
                tracing::warn!(%reservation_id, %error, "Could not check payment status; left for reconciliation");
                reservation.last_error = Some(error);
                state.busy.remove(&reservation_id);
                SmallVec::new()
            },

            ReservationAction::BookingRecorded { booking_id, .. } => {
                tracing::info!(%reservation_id, %booking_id, "Booking recorded");
                reservation.booking_id = Some(booking_id);
                reservation.advance(ReservationStage::BookingRecorded, now);
                smallvec![book_slot(env, reservation, true)]
            },

            ReservationAction::BookingWriteFailed { error, .. } => {
                tracing::error!(%reservation_id, %error, "Failed to write booking; availability untouched");
                reservation.last_error = Some(error.clone());
                state.busy.remove(&reservation_id);
                fail(reservation_id, ReservationError::Upstream(error))
            },

            ReservationAction::SlotBooked { .. } => {
                let booking_id = reservation
                    .booking_id
                    .unwrap_or_else(|| BookingId::for_reservation(reservation_id));
                metrics::record_booking_confirmed();
                tracing::info!(%reservation_id, %booking_id, "Booking confirmed");
                reservation.advance(ReservationStage::Confirmed, now);
                let reservation = reservation.clone();
                state.free_slot(&reservation);
                state.busy.remove(&reservation_id);
                smallvec![save_then(
                    env,
                    &reservation,
                    ReservationAction::BookingConfirmed {
                        reservation_id,
                        booking_id
                    }
                )]
            },

            ReservationAction::SlotBookFailed { error, .. } => {
                tracing::error!(%reservation_id, %error, "Booking written but slot not booked; left for reconciliation");
                reservation.last_error = Some(error);
                state.busy.remove(&reservation_id);
                SmallVec::new()
            },

            ReservationAction::BookingConfirmed { .. } => SmallVec::new(),

            ReservationAction::ReservationFailed { error, .. } => {
                metrics::record_reservation_failed(error.code());
                SmallVec::new()
            },

            ReservationAction::ReserveSlot { .. }
            | ReservationAction::ConfirmBooking { .. }
            | ReservationAction::ExpireHold { .. }
            | ReservationAction::RestoreReservation { .. }
            | ReservationAction::PruneSettled { .. } => SmallVec::new(),
        }
    }
}

impl Reducer for ReservationReducer {
    type State = ReservationState;
    type Action = ReservationAction;
    type Environment = ReservationEnvironment;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            ReservationAction::ReserveSlot {
                reservation_id,
                tenant_id,
                merchant_account_id,
                court_number,
                start_time,
                end_time,
                guest,
                quote,
            } => Self::reserve(
                state,
                env,
                reservation_id,
                tenant_id,
                merchant_account_id,
                SlotKey {
                    tenant_id,
                    court_number,
                    start_time,
                },
                end_time,
                guest,
                quote,
            ),

            ReservationAction::ConfirmBooking {
                reservation_id,
                tenant_id,
            } => Self::confirm(state, env, reservation_id, tenant_id),

            ReservationAction::ExpireHold { reservation_id } => {
                Self::expire(state, env, reservation_id)
            },

            ReservationAction::RestoreReservation { reservation } => {
                let reservation = *reservation;
                if state.contains(&reservation.id) {
                    return SmallVec::new();
                }
                tracing::info!(reservation_id = %reservation.id, stage = %reservation.stage, "Reservation restored");
                if !reservation.stage.is_terminal() {
                    state
                        .active_slots
                        .entry(reservation.slot.clone())
                        .or_insert(reservation.id);
                }
                state.reservations.insert(reservation.id, reservation);
                SmallVec::new()
            },

            ReservationAction::PruneSettled { before } => {
                let settled: Vec<ReservationId> = state
                    .reservations
                    .values()
                    .filter(|r| r.stage.is_terminal() && r.updated_at < before)
                    .map(|r| r.id)
                    .collect();
                for id in &settled {
                    state.reservations.remove(id);
                    state.busy.remove(id);
                }
                if !settled.is_empty() {
                    tracing::debug!(count = settled.len(), "Pruned settled reservations");
                }
                SmallVec::new()
            },

            outcome => Self::apply_outcome(state, env, outcome),
        }
    }
}

/// Store running the reservation saga
pub type ReservationStore =
    Store<ReservationState, ReservationAction, ReservationEnvironment, ReservationReducer>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::mocks::{
        InMemoryDataApi, MockPaymentPlatform, sample_guest, sample_quote, test_environment,
    };
    use courtside_testing::effects::collect_actions;
    use courtside_testing::mocks::ManualClock;
    use courtside_testing::{ReducerTest, assertions};

    fn env() -> ReservationEnvironment {
        test_environment(
            Arc::new(InMemoryDataApi::new()),
            Arc::new(MockPaymentPlatform::new()),
            Arc::new(ManualClock::default()),
        )
    }

    fn reserve(reservation_id: ReservationId, tenant_id: TenantId) -> ReservationAction {
        let start_time = ManualClock::default().now() + chrono::Duration::days(1);
        ReservationAction::ReserveSlot {
            reservation_id,
            tenant_id,
            merchant_account_id: Some("acct_test".to_string()),
            court_number: 1,
            start_time,
            end_time: start_time + chrono::Duration::minutes(90),
            guest: sample_guest(),
            quote: sample_quote(7500),
        }
    }

    fn single_failure(effects: Vec<Effect<ReservationAction>>) -> ReservationError {
        let actions = tokio_test::block_on(collect_actions(effects));
        match actions.as_slice() {
            [ReservationAction::ReservationFailed { error, .. }] => error.clone(),
            other => panic!("expected a single ReservationFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_reserve_records_intent_before_holding() {
        let id = ReservationId::new();
        let tenant = TenantId::new();

        ReducerTest::new(ReservationReducer::new())
            .with_env(env())
            .given_state(ReservationState::default())
            .when_action(reserve(id, tenant))
            .then_state(move |state| {
                let r = state.get(&id).unwrap();
                assert_eq!(r.stage, ReservationStage::Initiated);
                assert_eq!(state.active_slots.get(&r.slot), Some(&id));
            })
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn test_reserve_rejects_missing_merchant_account() {
        let id = ReservationId::new();
        let mut action = reserve(id, TenantId::new());
        if let ReservationAction::ReserveSlot {
            merchant_account_id,
            ..
        } = &mut action
        {
            *merchant_account_id = None;
        }

        let (state, effects) = ReducerTest::new(ReservationReducer::new())
            .with_env(env())
            .given_state(ReservationState::default())
            .when_action(action)
            .run_collecting();

        assert!(!state.contains(&id));
        assert_eq!(single_failure(effects), ReservationError::NotConnected);
    }

    #[test]
    fn test_reserve_rejects_slot_reserved_in_process() {
        let tenant = TenantId::new();
        let first = ReservationId::new();
        let second = ReservationId::new();

        let (state, effects) = ReducerTest::new(ReservationReducer::new())
            .with_env(env())
            .given_actions([reserve(first, tenant)])
            .when_action(reserve(second, tenant))
            .run_collecting();

        assert!(state.contains(&first));
        assert!(!state.contains(&second));
        assert_eq!(single_failure(effects), ReservationError::SlotUnavailable);
    }

    #[test]
    fn test_reserve_rejects_inverted_range() {
        let id = ReservationId::new();
        let mut action = reserve(id, TenantId::new());
        if let ReservationAction::ReserveSlot {
            start_time,
            end_time,
            ..
        } = &mut action
        {
            *end_time = *start_time;
        }

        let (_, effects) = ReducerTest::new(ReservationReducer::new())
            .with_env(env())
            .given_state(ReservationState::default())
            .when_action(action)
            .run_collecting();

        assert!(matches!(single_failure(effects), ReservationError::Validation(_)));
    }

    #[test]
    fn test_slot_held_requests_intent_and_schedules_expiry() {
        let id = ReservationId::new();
        let environment = env();
        let ttl = environment.hold_ttl;

        ReducerTest::new(ReservationReducer::new())
            .with_env(environment)
            .given_actions([
                reserve(id, TenantId::new()),
                ReservationAction::IntentRecorded { reservation_id: id },
            ])
            .when_action(ReservationAction::SlotHeld { reservation_id: id })
            .then_state(move |state| {
                assert_eq!(state.get(&id).unwrap().stage, ReservationStage::Held);
            })
            .then_effects(move |effects| {
                assertions::assert_effects_count(effects, 2);
                assertions::assert_has_delay(effects, ttl, |a| {
                    matches!(a, ReservationAction::ExpireHold { reservation_id } if *reservation_id == id)
                });
            })
            .run();
    }

    #[test]
    fn test_hold_failure_frees_slot_and_fails() {
        let id = ReservationId::new();

        let (state, effects) = ReducerTest::new(ReservationReducer::new())
            .with_env(env())
            .given_actions([
                reserve(id, TenantId::new()),
                ReservationAction::IntentRecorded { reservation_id: id },
            ])
            .when_action(ReservationAction::SlotHoldFailed {
                reservation_id: id,
                error: ReservationError::SlotUnavailable,
            })
            .run_collecting();

        assert_eq!(state.get(&id).unwrap().stage, ReservationStage::Failed);
        assert!(state.active_slots.is_empty());
        assert_eq!(single_failure(effects), ReservationError::SlotUnavailable);
    }

    #[test]
    fn test_confirm_unknown_reservation_is_not_found() {
        let (_, effects) = ReducerTest::new(ReservationReducer::new())
            .with_env(env())
            .given_state(ReservationState::default())
            .when_action(ReservationAction::ConfirmBooking {
                reservation_id: ReservationId::new(),
                tenant_id: TenantId::new(),
            })
            .run_collecting();

        assert_eq!(single_failure(effects), ReservationError::NotFound);
    }

    #[test]
    fn test_confirm_other_tenant_is_not_found() {
        let id = ReservationId::new();

        let (_, effects) = ReducerTest::new(ReservationReducer::new())
            .with_env(env())
            .given_actions([reserve(id, TenantId::new())])
            .when_action(ReservationAction::ConfirmBooking {
                reservation_id: id,
                tenant_id: TenantId::new(),
            })
            .run_collecting();

        assert_eq!(single_failure(effects), ReservationError::NotFound);
    }

    #[test]
    fn test_confirm_before_payment_requested_is_invalid() {
        let id = ReservationId::new();
        let tenant = TenantId::new();

        let (_, effects) = ReducerTest::new(ReservationReducer::new())
            .with_env(env())
            .given_actions([reserve(id, tenant)])
            .when_action(ReservationAction::ConfirmBooking {
                reservation_id: id,
                tenant_id: tenant,
            })
            .run_collecting();

        assert!(matches!(single_failure(effects), ReservationError::InvalidState(_)));
    }

    #[test]
    fn test_expire_before_deadline_is_ignored() {
        let id = ReservationId::new();

        ReducerTest::new(ReservationReducer::new())
            .with_env(env())
            .given_actions([
                reserve(id, TenantId::new()),
                ReservationAction::IntentRecorded { reservation_id: id },
                ReservationAction::SlotHeld { reservation_id: id },
            ])
            .when_action(ReservationAction::ExpireHold { reservation_id: id })
            .then_state(move |state| {
                assert_eq!(state.get(&id).unwrap().stage, ReservationStage::Held);
                assert!(state.busy.is_empty());
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_expire_held_releases() {
        let id = ReservationId::new();
        let clock = Arc::new(ManualClock::default());
        let environment = test_environment(
            Arc::new(InMemoryDataApi::new()),
            Arc::new(MockPaymentPlatform::new()),
            clock.clone(),
        );
        let mut state = ReservationState::default();
        let reducer = ReservationReducer::new();
        for action in [
            reserve(id, TenantId::new()),
            ReservationAction::IntentRecorded { reservation_id: id },
            ReservationAction::SlotHeld { reservation_id: id },
        ] {
            let _ = reducer.reduce(&mut state, action, &environment);
        }
        clock.advance(chrono::Duration::minutes(11));

        let effects = reducer.reduce(
            &mut state,
            ReservationAction::ExpireHold { reservation_id: id },
            &environment,
        );

        assert_eq!(effects.len(), 1);
        assert!(state.busy.contains(&id));

        // A second expiry while the first is in flight does nothing
        let again = reducer.reduce(
            &mut state,
            ReservationAction::ExpireHold { reservation_id: id },
            &environment,
        );
        assert!(again.is_empty());
    }

    #[test]
    fn test_expire_unrecorded_hold_releases() {
        let id = ReservationId::new();
        let clock = Arc::new(ManualClock::default());
        let environment = test_environment(
            Arc::new(InMemoryDataApi::new()),
            Arc::new(MockPaymentPlatform::new()),
            clock.clone(),
        );
        let mut state = ReservationState::default();
        let reducer = ReservationReducer::new();
        let _ = reducer.reduce(&mut state, reserve(id, TenantId::new()), &environment);
        clock.advance(chrono::Duration::minutes(11));

        let effects = reducer.reduce(
            &mut state,
            ReservationAction::ExpireHold { reservation_id: id },
            &environment,
        );

        assert_eq!(effects.len(), 1);
        assert!(state.busy.contains(&id));
        assert_eq!(state.get(&id).unwrap().stage, ReservationStage::Initiated);
    }

    #[test]
    fn test_late_intent_after_release_is_cancelled_and_fails() {
        let id = ReservationId::new();
        let platform = Arc::new(MockPaymentPlatform::new());
        let environment = test_environment(
            Arc::new(InMemoryDataApi::new()),
            platform.clone(),
            Arc::new(ManualClock::default()),
        );
        let record = crate::mocks::sample_reservation();

        let (state, effects) = ReducerTest::new(ReservationReducer::new())
            .with_env(environment)
            .given_actions([
                reserve(id, TenantId::new()),
                ReservationAction::IntentRecorded { reservation_id: id },
                ReservationAction::SlotHeld { reservation_id: id },
                ReservationAction::PaymentIntentFailed {
                    reservation_id: id,
                    error: "timeout".to_string(),
                },
                ReservationAction::HoldReleased {
                    reservation_id: id,
                    cause: ReleaseCause::PaymentIntentFailed,
                },
            ])
            .when_action(ReservationAction::PaymentIntentCreated {
                reservation_id: id,
                intent: crate::mocks::sample_intent(&record),
            })
            .run_collecting();

        let reservation = state.get(&id).unwrap();
        assert_eq!(reservation.stage, ReservationStage::Released);
        assert!(reservation.payment_intent.is_none());
        assert_eq!(single_failure(effects), ReservationError::Expired);
        assert_eq!(platform.call_count("cancel_payment_intent"), 1);
    }

    #[test]
    fn test_intent_is_reported_after_it_is_recorded() {
        let id = ReservationId::new();
        let record = crate::mocks::sample_reservation();
        let intent = crate::mocks::sample_intent(&record);
        let expected = intent.id.clone();

        let (state, effects) = ReducerTest::new(ReservationReducer::new())
            .with_env(env())
            .given_actions([
                reserve(id, TenantId::new()),
                ReservationAction::IntentRecorded { reservation_id: id },
                ReservationAction::SlotHeld { reservation_id: id },
            ])
            .when_action(ReservationAction::PaymentIntentCreated {
                reservation_id: id,
                intent,
            })
            .run_collecting();

        let reservation = state.get(&id).unwrap();
        assert_eq!(reservation.stage, ReservationStage::AwaitingPayment);
        let actions = tokio_test::block_on(collect_actions(effects));
        match actions.as_slice() {
            [ReservationAction::PaymentRequested {
                intent, expires_at, ..
            }] => {
                assert_eq!(intent.id, expected);
                assert_eq!(*expires_at, reservation.expires_at);
            },
            other => panic!("expected PaymentRequested, got {other:?}"),
        }
    }

    #[test]
    fn test_prune_removes_only_settled() {
        let open = ReservationId::new();
        let failed = ReservationId::new();
        let tenant = TenantId::new();
        let mut second = reserve(failed, tenant);
        if let ReservationAction::ReserveSlot { court_number, .. } = &mut second {
            *court_number = 2;
        }

        let (state, _) = ReducerTest::new(ReservationReducer::new())
            .with_env(env())
            .given_actions([
                reserve(open, tenant),
                second,
                ReservationAction::IntentRecordFailed {
                    reservation_id: failed,
                    error: "boom".to_string(),
                },
            ])
            .when_action(ReservationAction::PruneSettled {
                before: ManualClock::default().now() + chrono::Duration::seconds(1),
            })
            .run_collecting();

        assert!(state.contains(&open));
        assert!(!state.contains(&failed));
    }

    #[test]
    fn test_restore_tracks_open_reservation_once() {
        let mut record = crate::mocks::sample_reservation();
        record.stage = ReservationStage::AwaitingPayment;
        let id = record.id;

        let (state, effects) = ReducerTest::new(ReservationReducer::new())
            .with_env(env())
            .given_actions([ReservationAction::RestoreReservation {
                reservation: Box::new(record.clone()),
            }])
            .when_action(ReservationAction::RestoreReservation {
                reservation: Box::new(record.clone()),
            })
            .run_collecting();

        assert!(effects.is_empty());
        assert_eq!(state.get(&id).unwrap().stage, ReservationStage::AwaitingPayment);
        assert_eq!(state.active_slots.get(&record.slot), Some(&id));
    }

    #[test]
    fn test_outcome_matchers() {
        let id = ReservationId::new();
        let failed = ReservationAction::ReservationFailed {
            reservation_id: id,
            error: ReservationError::Expired,
        };
        assert!(failed.settles_reserve(id));
        assert!(failed.settles_confirm(id));
        assert!(!failed.settles_reserve(ReservationId::new()));

        let book_failed = ReservationAction::SlotBookFailed {
            reservation_id: id,
            error: "timeout".to_string(),
        };
        assert!(book_failed.settles_confirm(id));
        assert!(!book_failed.settles_reserve(id));

        let created = ReservationAction::PaymentIntentCreated {
            reservation_id: id,
            intent: crate::mocks::sample_intent(&crate::mocks::sample_reservation()),
        };
        assert!(!created.settles_reserve(id));
    }
}
