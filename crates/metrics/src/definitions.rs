//! Metric name and label definitions.
//!
//! Every metric herald records is named here so the set of exported series is
//! documented in one place.

/// Inbound dispatch metrics
pub mod dispatch {
    /// Total number of messages handed to `Robot::receive`
    pub const MESSAGES_RECEIVED_TOTAL: &str = "herald_dispatch_messages_received_total";
    /// Messages that matched no listener and were re-dispatched as catch-all
    pub const CATCH_ALL_FALLBACKS_TOTAL: &str = "herald_dispatch_catch_all_fallbacks_total";
    /// Messages a listener marked as finished
    pub const MESSAGES_FINISHED_TOTAL: &str = "herald_dispatch_messages_finished_total";
    /// Time from `receive` until the inbound pipeline unwound, in seconds
    pub const DURATION_SECONDS: &str = "herald_dispatch_duration_seconds";
}

/// Listener metrics
pub mod listeners {
    /// Number of registered listeners
    pub const REGISTERED: &str = "herald_listeners_registered";
    /// Listeners whose matcher accepted a message
    pub const EXECUTED_TOTAL: &str = "herald_listeners_executed_total";
    /// Listener callbacks that returned an error or panicked
    pub const ERRORS_TOTAL: &str = "herald_listener_errors_total";
}

/// Middleware pipeline metrics
pub mod middleware {
    /// Pipeline executions that stopped because a stage returned `Done`
    pub const HALTED_TOTAL: &str = "herald_middleware_halted_total";
    /// Pipeline executions aborted by a failing stage
    pub const FAILURES_TOTAL: &str = "herald_middleware_failures_total";
}

/// Outbound (send/reply) metrics
pub mod outbound {
    /// Strings delivered to the adapter
    pub const STRINGS_SENT_TOTAL: &str = "herald_outbound_strings_sent_total";
    /// Outbound calls vetoed by response middleware
    pub const VETOED_TOTAL: &str = "herald_outbound_vetoed_total";
    /// Adapter send/reply failures
    pub const ADAPTER_ERRORS_TOTAL: &str = "herald_outbound_adapter_errors_total";
}

/// Brain metrics
pub mod brain {
    /// Number of known users
    pub const USERS: &str = "herald_brain_users";
    /// Save events emitted
    pub const SAVES_TOTAL: &str = "herald_brain_saves_total";
}

/// Common label keys
pub mod labels {
    pub const KIND: &str = "kind";
    pub const PIPELINE: &str = "pipeline";
    pub const METHOD: &str = "method";
    pub const LISTENER: &str = "listener";
}

/// Standard histogram buckets
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Dispatch duration buckets (in seconds)
    /// Covers 100us to 30s; listeners may wait on external I/O
    pub static DISPATCH_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
        ]
    });
}
