use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerErrorKind {
    /// The broker flagged the failure as temporary (broker down, leader election, ...).
    Temporary,
    /// The operation timed out.
    Timeout,
    Fatal,
}

impl std::fmt::Display for BrokerErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerErrorKind::Temporary => f.write_str("temporary"),
            BrokerErrorKind::Timeout => f.write_str("timeout"),
            BrokerErrorKind::Fatal => f.write_str("fatal"),
        }
    }
}

/// An error returned by a broker reader, classified for recovery.
#[derive(Debug, Error)]
#[error("{kind} broker error: {source}")]
pub struct BrokerError {
    kind: BrokerErrorKind,
    #[source]
    source: BoxError,
}

impl BrokerError {
    pub fn new(kind: BrokerErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn temporary(source: impl Into<BoxError>) -> Self {
        Self::new(BrokerErrorKind::Temporary, source)
    }

    pub fn timeout(source: impl Into<BoxError>) -> Self {
        Self::new(BrokerErrorKind::Timeout, source)
    }

    pub fn fatal(source: impl Into<BoxError>) -> Self {
        Self::new(BrokerErrorKind::Fatal, source)
    }

    pub fn kind(&self) -> BrokerErrorKind {
        self.kind
    }

    pub fn is_temporary(&self) -> bool {
        self.kind == BrokerErrorKind::Temporary
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == BrokerErrorKind::Timeout
    }

    /// Transient errors are retried in place after a reconnect; everything else is fatal.
    pub fn is_transient(&self) -> bool {
        self.is_temporary() || self.is_timeout()
    }
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("unrecoverable broker error: {0}")]
    Broker(#[source] BrokerError),

    #[error("failed to create the initial broker reader: {0}")]
    ReaderInit(#[source] BrokerError),

    #[error("failed to create a replacement broker reader: {0}")]
    Reconnect(#[source] BrokerError),

    #[error("failed to close the broker reader: {0}")]
    Close(#[source] BrokerError),

    /// Shutdown started while the processing loop was busy. Used to unwind the loop;
    /// never returned from [`Listener::run`](crate::Listener::run).
    #[error("listener: exit processing loop")]
    ExitProcessingLoop,

    /// The ambient cancellation token fired. Treated as a graceful stop by `run`.
    #[error("listener: cancelled")]
    Cancelled,
}

impl ListenerError {
    /// True for the values that only unwind the processing loop.
    pub fn is_graceful_stop(&self) -> bool {
        matches!(
            self,
            ListenerError::ExitProcessingLoop | ListenerError::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BrokerError::temporary("broker down").is_transient());
        assert!(BrokerError::timeout("fetch timed out").is_transient());
        assert!(!BrokerError::fatal("authentication failed").is_transient());

        let err = BrokerError::timeout("fetch timed out");
        assert!(err.is_timeout());
        assert!(!err.is_temporary());
        assert_eq!(err.kind(), BrokerErrorKind::Timeout);
    }

    #[test]
    fn test_display_includes_kind_and_cause() {
        let err = BrokerError::temporary("all brokers down");
        assert_eq!(err.to_string(), "temporary broker error: all brokers down");

        let wrapped = ListenerError::Broker(BrokerError::fatal("bad topic"));
        assert_eq!(
            wrapped.to_string(),
            "unrecoverable broker error: fatal broker error: bad topic"
        );
    }

    #[test]
    fn test_graceful_stop_values() {
        assert!(ListenerError::ExitProcessingLoop.is_graceful_stop());
        assert!(ListenerError::Cancelled.is_graceful_stop());
        assert!(!ListenerError::Broker(BrokerError::fatal("boom")).is_graceful_stop());
    }
}
