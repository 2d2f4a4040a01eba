//! Declarative macros for ergonomic effect construction.

/// Create an `Effect::Future` from an async block
///
/// # Example
///
/// ```rust,ignore
/// use courtside_core::async_effect;
///
/// let platform = env.payments.clone();
/// async_effect! {
///     match platform.create_payment_intent(request).await {
///         Ok(intent) => Some(Action::PaymentIntentCreated { reservation_id, intent }),
///         Err(e) => Some(Action::PaymentIntentFailed { reservation_id, reason: e.to_string() }),
///     }
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}

/// Create an `Effect::Delay` for scheduling delayed actions
///
/// # Example
///
/// ```rust,ignore
/// use courtside_core::delay;
/// use std::time::Duration;
///
/// delay! {
///     duration: Duration::from_secs(600),
///     action: Action::ExpireHold { reservation_id }
/// }
/// ```
#[macro_export]
macro_rules! delay {
    (
        duration: $duration:expr,
        action: $action:expr
    ) => {
        $crate::effect::Effect::Delay {
            duration: $duration,
            action: ::std::boxed::Box::new($action),
        }
    };
}

/// Create an `Effect::Future` that immediately dispatches an action.
///
/// Used by reducers that need to report an outcome to observers (e.g. an
/// HTTP handler waiting on `send_and_wait_for`) without doing any I/O.
#[macro_export]
macro_rules! emit {
    ($action:expr) => {{
        let action = $action;
        $crate::effect::Effect::Future(::std::boxed::Box::pin(async move { Some(action) }))
    }};
}
