//! # Courtside Core
//!
//! The functional core of the Courtside booking backend.
//!
//! Business workflows (holding a court slot, requesting a payment intent,
//! confirming a booking) are written as reducers: pure functions that take the
//! current state and an action, mutate the state, and return descriptions of
//! the side effects to run next. The runtime crate executes those effects and
//! feeds the actions they produce back into the reducer.
//!
//! ## Core Concepts
//!
//! - **State**: what the workflow knows (e.g. reservations in flight)
//! - **Action**: commands from the HTTP layer and events produced by effects
//! - **Reducer**: `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: a description of I/O, never the I/O itself
//! - **Environment**: injected clients (Data API, payment platform, clock)
//!
//! ## Example
//!
//! ```ignore
//! use courtside_core::*;
//!
//! impl Reducer for HoldReducer {
//!     type State = HoldState;
//!     type Action = HoldAction;
//!     type Environment = HoldEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut HoldState,
//!         action: HoldAction,
//!         env: &HoldEnvironment,
//!     ) -> SmallVec<[Effect<HoldAction>; 4]> {
//!         match action {
//!             HoldAction::HoldSlot { slot } => {
//!                 state.pending.insert(slot.clone());
//!                 let accessor = env.availability.clone();
//!                 smallvec![async_effect! {
//!                     Some(match accessor.hold(&slot).await {
//!                         Ok(()) => HoldAction::SlotHeld { slot },
//!                         Err(e) => HoldAction::HoldRejected { slot, reason: e.to_string() },
//!                     })
//!                 }]
//!             }
//!             _ => SmallVec::new(),
//!         }
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

mod effect_macros;

/// Reducer module - the core trait for business logic
pub mod reducer {
    use super::SmallVec;
    use super::effect::Effect;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    ///
    /// Reducers must not perform I/O themselves. Anything that talks to the
    /// Data API or the payment platform is returned as an [`Effect`].
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// Most reducers return zero to two effects, so the result is kept
        /// inline in a `SmallVec` and only spills to the heap for larger
        /// fan-outs.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - side effect descriptions
///
/// Effects are values. They are returned from reducers and executed by the
/// Store; a reducer never awaits anything.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// Effect type - describes a side effect to be executed
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects concurrently
        Parallel(Vec<Effect<Action>>),

        /// Run effects one after another, each finishing before the next starts
        Sequential(Vec<Effect<Action>>),

        /// Dispatch an action after a delay (hold expiry, retries)
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if `Some`, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// Returns `true` for [`Effect::None`]
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Environment module - dependency injection traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Hold expiry and reconciliation both depend on "now"; tests swap in a
    /// fixed or manually advanced clock.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
