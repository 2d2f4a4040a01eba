//! # Courtside Testing
//!
//! Testing utilities for Courtside reducers.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - A Given-When-Then harness for reducers ([`ReducerTest`])
//! - Helpers that execute returned effects without a Store
//!
//! ## Example
//!
//! ```ignore
//! use courtside_testing::{ReducerTest, test_clock};
//!
//! ReducerTest::new(ReservationReducer::new())
//!     .with_env(test_environment(test_clock()))
//!     .given_state(ReservationState::default())
//!     .when_action(ReservationAction::ExpireHold { reservation_id })
//!     .then_effects(|effects| assertions::assert_no_effects(effects))
//!     .run();
//! ```

use chrono::{DateTime, Utc};
use courtside_core::environment::Clock;


pub use reducer_test::{ReducerTest, assertions};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use courtside_testing::mocks::FixedClock;
    /// use courtside_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to
    ///
    /// Clones share the same time, so a test can hold one handle and pass
    /// another into an environment.
    ///
    /// ```
    /// use courtside_testing::mocks::ManualClock;
    /// use courtside_core::environment::Clock;
    ///
    /// let clock = ManualClock::default();
    /// let before = clock.now();
    /// clock.advance(chrono::Duration::minutes(11));
    /// assert_eq!(clock.now() - before, chrono::Duration::minutes(11));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(super::test_time())
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(super::test_time())
    }
}

/// Helpers for running effects in reducer tests
pub mod effects {
    use courtside_core::effect::Effect;
    use futures::future::BoxFuture;

    /// Execute effects the way the Store would, without a Store
    ///
    /// Futures are awaited, delays resolve immediately, and the produced
    /// actions are returned in completion order (parallel branches are
    /// run one after another).
    pub async fn collect_actions<A, I>(effects: I) -> Vec<A>
    where
        A: Send + 'static,
        I: IntoIterator<Item = Effect<A>>,
    {
        let mut actions = Vec::new();
        for effect in effects {
            actions.extend(run(effect).await);
        }
        actions
    }

    fn run<A: Send + 'static>(effect: Effect<A>) -> BoxFuture<'static, Vec<A>> {
        Box::pin(async move {
            match effect {
                Effect::None => Vec::new(),
                Effect::Future(fut) => fut.await.into_iter().collect(),
                Effect::Delay { action, .. } => vec![*action],
                Effect::Parallel(effects) | Effect::Sequential(effects) => {
                    let mut actions = Vec::new();
                    for effect in effects {
                        actions.extend(run(effect).await);
                    }
                    actions
                },
            }
        })
    }
}

fn test_time() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use courtside_core::{async_effect, delay, effect::Effect};
    use std::time::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::default();
        let handle = clock.clone();
        handle.advance(chrono::Duration::seconds(90));
        assert_eq!(clock.now(), test_clock().now() + chrono::Duration::seconds(90));
    }

    #[tokio::test]
    async fn test_collect_actions_flattens_effects() {
        let effects = vec![
            Effect::None,
            async_effect! { Some(1) },
            Effect::chain(vec![
                async_effect! { Some(2) },
                async_effect! { None },
                delay! { duration: Duration::from_secs(600), action: 3 },
            ]),
        ];

        assert_eq!(effects::collect_actions(effects).await, vec![1, 2, 3]);
    }
}
