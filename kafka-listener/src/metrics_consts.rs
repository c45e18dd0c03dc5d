use metrics::Counter;

// ==== Listener counters ====
/// Counter for records committed to the broker
pub const MESSAGES_PROCESSED: &str = "kafka_listener_messages_processed_total";

/// Counter for records dropped because the mailbox still held an unread payload
pub const MESSAGES_DROPPED: &str = "kafka_listener_messages_dropped_total";

/// Counter for failed fetch, commit and close calls against the broker
pub const BROKER_ERRORS: &str = "kafka_listener_broker_errors_total";

/// Counter for records dropped because the processor did not report an outcome in time
pub const MESSAGES_ACK_TIMEOUT: &str = "kafka_listener_messages_ack_timeout_total";

/// Counter for records the processor reported as failed
pub const MESSAGES_FAILED: &str = "kafka_listener_messages_failed_total";

/// Counter for reader replacements after a transient broker error
pub const RECONNECTS: &str = "kafka_listener_reconnects_total";

/// Counter for errors returned by the dropped-message handler
pub const DROPPED_HANDLER_ERRORS: &str = "kafka_listener_dropped_handler_errors_total";

/// Increment-only counters the listener reports to.
///
/// `Default` registers them with the global `metrics` recorder; callers that want their
/// own sinks can pass any [`Counter`], e.g. one built with [`Counter::from_arc`].
#[derive(Clone)]
pub struct ListenerMetrics {
    pub messages_processed: Counter,
    pub messages_dropped: Counter,
    pub broker_errors: Counter,
    pub messages_ack_timeout: Counter,
    pub messages_failed: Counter,
    pub reconnects: Counter,
    pub dropped_handler_errors: Counter,
}

impl Default for ListenerMetrics {
    fn default() -> Self {
        Self {
            messages_processed: metrics::counter!(MESSAGES_PROCESSED),
            messages_dropped: metrics::counter!(MESSAGES_DROPPED),
            broker_errors: metrics::counter!(BROKER_ERRORS),
            messages_ack_timeout: metrics::counter!(MESSAGES_ACK_TIMEOUT),
            messages_failed: metrics::counter!(MESSAGES_FAILED),
            reconnects: metrics::counter!(RECONNECTS),
            dropped_handler_errors: metrics::counter!(DROPPED_HANDLER_ERRORS),
        }
    }
}
