//! # Courtside Runtime
//!
//! The Store that runs Courtside reducers.
//!
//! A [`Store`] owns the state of one reducer, serializes actions through it,
//! executes the effects it returns and feeds the actions those effects produce
//! back into the reducer. HTTP handlers use [`Store::send_and_wait_for`] to
//! turn that asynchronous feedback loop into a request/response exchange.
//!
//! ## Example
//!
//! ```ignore
//! use courtside_runtime::Store;
//!
//! let store = Store::new(ReservationState::default(), ReservationReducer::new(), env);
//!
//! let outcome = store
//!     .send_and_wait_for(
//!         ReservationAction::ReserveSlot { .. },
//!         |a| a.settles_reserve(reservation_id),
//!         Duration::from_secs(30),
//!     )
//!     .await?;
//!
//! let active = store.state(|s| s.reservations.len()).await;
//! ```

use courtside_core::{effect::Effect, reducer::Reducer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Retry logic with exponential backoff
pub mod retry;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        ///
        /// Returned when `send()` is called after shutdown initiated.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for effects to complete
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// Timeout waiting for terminal action
        ///
        /// Returned by `send_and_wait_for` when the timeout expires before
        /// a matching action is received.
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;

/// Default capacity of the action broadcast channel.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Decrements a shared counter when dropped, so spawned effects are
/// accounted for even if they panic.
struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Store module - the runtime for reducers
pub mod store {
    use super::{
        Arc, AtomicBool, AtomicUsize, DEFAULT_BROADCAST_CAPACITY, Duration, Effect, Ordering,
        PendingGuard, Reducer, RwLock, StoreError,
    };
    use futures::future::{BoxFuture, join_all};
    use tokio::sync::broadcast;

    /// The Store - runtime coordinator for a reducer
    ///
    /// The Store manages:
    /// 1. State (behind `RwLock` for concurrent access)
    /// 2. Reducer (business logic)
    /// 3. Environment (injected dependencies)
    /// 4. Effect execution (with feedback loop)
    ///
    /// Cloning a Store is cheap; all clones share the same state.
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: Arc<R>,
        environment: Arc<E>,
        shutdown: Arc<AtomicBool>,
        pending_effects: Arc<AtomicUsize>,
        /// Every action produced by an effect is published here after the
        /// reducer has processed it.
        action_broadcast: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + Clone + std::fmt::Debug + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Create a new store with initial state, reducer, and environment
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_broadcast_capacity(
                initial_state,
                reducer,
                environment,
                DEFAULT_BROADCAST_CAPACITY,
            )
        }

        /// Create a store with a custom action broadcast capacity
        ///
        /// Observers that fall more than `capacity` actions behind miss
        /// actions; size it for the expected number of concurrent waiters.
        #[must_use]
        pub fn with_broadcast_capacity(
            initial_state: S,
            reducer: R,
            environment: E,
            capacity: usize,
        ) -> Self {
            let (action_broadcast, _) = broadcast::channel(capacity.max(1));

            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer: Arc::new(reducer),
                environment: Arc::new(environment),
                shutdown: Arc::new(AtomicBool::new(false)),
                pending_effects: Arc::new(AtomicUsize::new(0)),
                action_broadcast,
            }
        }

        /// The environment the reducer runs with
        #[must_use]
        pub fn environment(&self) -> &E {
            &self.environment
        }

        /// Number of effects currently executing
        ///
        /// Delayed actions waiting on their timer are not counted.
        #[must_use]
        pub fn pending_effects(&self) -> usize {
            self.pending_effects.load(Ordering::Acquire)
        }

        /// Initiate graceful shutdown
        ///
        /// Actions sent from outside are rejected from this point on. Waits
        /// for in-flight effects to finish; the actions they produce are still
        /// reduced, so a saga step that was running completes and any effects
        /// it returns are waited on too. Delayed actions still waiting on
        /// their timer are abandoned: when they fire, the store drops them.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if the timeout expires before all
        /// pending effects complete.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            tracing::info!("Initiating graceful shutdown");
            metrics::counter!("store.shutdown.initiated").increment(1);

            self.shutdown.store(true, Ordering::Release);

            let start = std::time::Instant::now();
            let poll_interval = Duration::from_millis(50);

            loop {
                let pending = self.pending_effects.load(Ordering::Acquire);

                if pending == 0 {
                    tracing::info!("All effects completed, shutdown successful");
                    return Ok(());
                }

                if start.elapsed() >= timeout {
                    tracing::error!(pending_effects = pending, "Shutdown timeout");
                    metrics::counter!("store.shutdown.timeout").increment(1);
                    return Err(StoreError::ShutdownTimeout(pending));
                }

                tokio::time::sleep(poll_interval).await;
            }
        }

        /// Send an action to the store
        ///
        /// 1. Acquires write lock on state
        /// 2. Calls reducer with (state, action, environment)
        /// 3. Spawns the returned effects
        ///
        /// Returns once the reducer has run; effects keep running in the
        /// background and the actions they produce are reduced in turn.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<(), StoreError> {
            if self.is_shutting_down() {
                tracing::warn!(?action, "Rejected action: store is shutting down");
                metrics::counter!("store.shutdown.rejected_actions").increment(1);
                return Err(StoreError::ShutdownInProgress);
            }

            self.apply(action).await;
            Ok(())
        }

        fn is_shutting_down(&self) -> bool {
            self.shutdown.load(Ordering::Acquire)
        }

        /// Reduce an action and spawn its effects
        async fn apply(&self, action: A) {
            metrics::counter!("store.actions.total").increment(1);

            let effects = {
                let mut state = self.state.write().await;

                let start = std::time::Instant::now();
                let effects = self.reducer.reduce(&mut *state, action, &*self.environment);
                metrics::histogram!("store.reducer.duration_seconds")
                    .record(start.elapsed().as_secs_f64());

                tracing::trace!("Reducer completed, returned {} effects", effects.len());
                effects
            };

            for effect in effects {
                self.spawn_effect(effect);
            }
        }

        /// Send an action and wait for a matching result action
        ///
        /// Subscribes to the action broadcast before sending, then waits for
        /// the first effect-produced action matching `predicate`. The matching
        /// action has already been applied to state when it is returned.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`]: Timeout expired before matching action received
        /// - [`StoreError::ChannelClosed`]: Action broadcast channel closed
        /// - [`StoreError::ShutdownInProgress`]: Store is shutting down
        ///
        /// # Notes
        ///
        /// - Only actions produced by effects are broadcast (not the initial action)
        /// - If the channel lags and drops actions, continues waiting (timeout catches it)
        /// - Use correlation IDs in the predicate to distinguish concurrent requests
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            F: Fn(&A) -> bool,
        {
            let mut rx = self.action_broadcast.subscribe();

            self.send(action).await?;

            tokio::time::timeout(timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Action observer lagged");
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        },
                    }
                }
            })
            .await
            .map_err(|_| StoreError::Timeout)?
        }

        /// Subscribe to all actions produced by effects
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.action_broadcast.subscribe()
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let active = store.state(|s| s.reservations.len()).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            let state = self.state.read().await;
            f(&*state)
        }

        /// Run the reducer on an effect-produced action, then publish it.
        ///
        /// Applied even during shutdown: the effect that produced it was
        /// already counted as in flight.
        async fn dispatch(&self, action: A) {
            let published = action.clone();
            self.apply(action).await;
            // No receivers is fine
            let _ = self.action_broadcast.send(published);
        }

        fn spawn_effect(&self, effect: Effect<A>) {
            if effect.is_none() {
                metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                return;
            }

            // Timers are not tracked so that shutdown does not wait on them
            let guard = if matches!(effect, Effect::Delay { .. }) {
                None
            } else {
                Some(PendingGuard::enter(&self.pending_effects))
            };

            let store = self.clone();
            tokio::spawn(async move {
                let _guard = guard;
                store.run_effect(effect).await;
            });
        }

        /// Execute one effect to completion, including dispatch of the
        /// action it produces.
        fn run_effect(&self, effect: Effect<A>) -> BoxFuture<'static, ()> {
            let store = self.clone();
            Box::pin(async move {
                match effect {
                    Effect::None => {
                        metrics::counter!("store.effects.executed", "type" => "none").increment(1);
                    },
                    Effect::Future(fut) => {
                        metrics::counter!("store.effects.executed", "type" => "future")
                            .increment(1);
                        if let Some(action) = fut.await {
                            store.dispatch(action).await;
                        }
                    },
                    Effect::Delay { duration, action } => {
                        metrics::counter!("store.effects.executed", "type" => "delay")
                            .increment(1);
                        tokio::time::sleep(duration).await;
                        tracing::trace!(?duration, "Effect::Delay elapsed");
                        if store.is_shutting_down() {
                            tracing::debug!(?action, "Dropped delayed action: store is shutting down");
                            metrics::counter!("store.shutdown.rejected_actions").increment(1);
                        } else {
                            store.dispatch(*action).await;
                        }
                    },
                    Effect::Parallel(effects) => {
                        metrics::counter!("store.effects.executed", "type" => "parallel")
                            .increment(1);
                        join_all(effects.into_iter().map(|e| store.run_effect(e))).await;
                    },
                    Effect::Sequential(effects) => {
                        metrics::counter!("store.effects.executed", "type" => "sequential")
                            .increment(1);
                        for effect in effects {
                            store.run_effect(effect).await;
                        }
                    },
                }
            })
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: Arc::clone(&self.reducer),
                environment: Arc::clone(&self.environment),
                shutdown: Arc::clone(&self.shutdown),
                pending_effects: Arc::clone(&self.pending_effects),
                action_broadcast: self.action_broadcast.clone(),
            }
        }
    }
}

// Re-export for convenience
pub use store::Store;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use courtside_core::{SmallVec, async_effect, delay, smallvec};

    #[derive(Debug, Default)]
    struct CourtState {
        held: u32,
        log: Vec<u32>,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum CourtAction {
        Hold,
        Release,
        HoldThenConfirm,
        Confirmed,
        ScheduleRelease,
        Record(u32),
        RecordInOrder,
        RecordInParallel,
        Silent,
    }

    #[derive(Debug, Clone)]
    struct CourtEnv;

    #[derive(Debug, Clone)]
    struct CourtReducer;

    impl Reducer for CourtReducer {
        type State = CourtState;
        type Action = CourtAction;
        type Environment = CourtEnv;

        fn reduce(
            &self,
            state: &mut CourtState,
            action: CourtAction,
            _env: &CourtEnv,
        ) -> SmallVec<[Effect<CourtAction>; 4]> {
            match action {
                CourtAction::Hold => {
                    state.held += 1;
                    SmallVec::new()
                },
                CourtAction::Release => {
                    state.held = state.held.saturating_sub(1);
                    SmallVec::new()
                },
                CourtAction::HoldThenConfirm => {
                    state.held += 1;
                    smallvec![async_effect! { Some(CourtAction::Confirmed) }]
                },
                CourtAction::Confirmed | CourtAction::Silent => SmallVec::new(),
                CourtAction::ScheduleRelease => smallvec![delay! {
                    duration: Duration::from_millis(20),
                    action: CourtAction::Release
                }],
                CourtAction::Record(n) => {
                    state.log.push(n);
                    SmallVec::new()
                },
                CourtAction::RecordInOrder => smallvec![Effect::chain(vec![
                    async_effect! {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Some(CourtAction::Record(1))
                    },
                    async_effect! { Some(CourtAction::Record(2)) },
                ])],
                CourtAction::RecordInParallel => smallvec![Effect::merge(vec![
                    async_effect! { Some(CourtAction::Record(10)) },
                    async_effect! { Some(CourtAction::Record(20)) },
                    Effect::None,
                ])],
            }
        }
    }

    fn store() -> Store<CourtState, CourtAction, CourtEnv, CourtReducer> {
        Store::new(CourtState::default(), CourtReducer, CourtEnv)
    }

    async fn wait_for_log_len(
        store: &Store<CourtState, CourtAction, CourtEnv, CourtReducer>,
        len: usize,
    ) -> Vec<u32> {
        for _ in 0..100 {
            let log = store.state(|s| s.log.clone()).await;
            if log.len() >= len {
                return log;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("log never reached {len} entries");
    }

    #[tokio::test]
    async fn test_send_runs_reducer() {
        let store = store();
        store.send(CourtAction::Hold).await.unwrap();
        store.send(CourtAction::Hold).await.unwrap();
        store.send(CourtAction::Release).await.unwrap();

        assert_eq!(store.state(|s| s.held).await, 1);
    }

    #[tokio::test]
    async fn test_send_and_wait_for_returns_feedback_action() {
        let store = store();
        let result = store
            .send_and_wait_for(
                CourtAction::HoldThenConfirm,
                |a| matches!(a, CourtAction::Confirmed),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(result, CourtAction::Confirmed);
        assert_eq!(store.state(|s| s.held).await, 1);
    }

    #[tokio::test]
    async fn test_send_and_wait_for_times_out() {
        let store = store();
        let result = store
            .send_and_wait_for(
                CourtAction::Silent,
                |a| matches!(a, CourtAction::Confirmed),
                Duration::from_millis(30),
            )
            .await;

        assert_eq!(result, Err(StoreError::Timeout));
    }

    #[tokio::test]
    async fn test_delay_dispatches_after_duration() {
        let store = store();
        store.send(CourtAction::Hold).await.unwrap();

        let released = store
            .send_and_wait_for(
                CourtAction::ScheduleRelease,
                |a| matches!(a, CourtAction::Release),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(released, CourtAction::Release);
        assert_eq!(store.state(|s| s.held).await, 0);
    }

    #[tokio::test]
    async fn test_sequential_effects_preserve_order() {
        let store = store();
        store.send(CourtAction::RecordInOrder).await.unwrap();

        let log = wait_for_log_len(&store, 2).await;
        assert_eq!(log, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_parallel_effects_all_dispatch() {
        let store = store();
        store.send(CourtAction::RecordInParallel).await.unwrap();

        let mut log = wait_for_log_len(&store, 2).await;
        log.sort_unstable();
        assert_eq!(log, vec![10, 20]);
    }

    #[tokio::test]
    async fn test_subscribers_see_effect_actions_only() {
        let store = store();
        let mut rx = store.subscribe_actions();

        store.send(CourtAction::HoldThenConfirm).await.unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, CourtAction::Confirmed);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_actions() {
        let store = store();
        store.shutdown(Duration::from_secs(1)).await.unwrap();

        let result = store.send(CourtAction::Hold).await;
        assert_eq!(result, Err(StoreError::ShutdownInProgress));
    }

    #[tokio::test]
    async fn test_shutdown_applies_feedback_from_running_effects() {
        let store = store();
        store.send(CourtAction::RecordInOrder).await.unwrap();

        store.shutdown(Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.state(|s| s.log.clone()).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_timer_firing_after_shutdown_is_dropped() {
        let store = store();
        store.send(CourtAction::Hold).await.unwrap();
        store.send(CourtAction::ScheduleRelease).await.unwrap();

        store.shutdown(Duration::from_millis(100)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.state(|s| s.held).await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_does_not_wait_for_timers() {
        let store = store();
        store.send(CourtAction::ScheduleRelease).await.unwrap();

        assert!(store.shutdown(Duration::from_millis(200)).await.is_ok());
        assert_eq!(store.pending_effects(), 0);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = store();
        let other = store.clone();
        other.send(CourtAction::Hold).await.unwrap();

        assert_eq!(store.state(|s| s.held).await, 1);
    }
}
