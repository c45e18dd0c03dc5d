use std::sync::Arc;
use std::time::Duration;

use crate::dropped::{DroppedMessageHandler, LogDroppedMessage};
use crate::error::BrokerError;
use crate::kafka_reader::{KafkaReader, KafkaReaderConfig};
use crate::metrics_consts::ListenerMetrics;
use crate::reader::{BrokerReader, ReaderFactory};

pub const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_RECOMMIT_INTERVAL: Duration = Duration::from_secs(5);

/// Listener configuration.
///
/// Anything left unset keeps its default:
/// - reader factory: a [`KafkaReader`] built from [`KafkaReaderConfig`] read from the environment
/// - processing timeout: 5s
/// - reconnect interval: 10s
/// - recommit interval: 5s
/// - dropped-message handler: [`LogDroppedMessage`]
/// - metrics: [`ListenerMetrics::default`], registered with the global recorder
#[derive(Clone)]
pub struct ListenerOptions {
    pub(crate) reader_factory: Option<ReaderFactory>,
    pub(crate) processing_timeout: Duration,
    pub(crate) reconnect_interval: Duration,
    pub(crate) recommit_interval: Duration,
    pub(crate) dropped_handler: Arc<dyn DroppedMessageHandler>,
    pub(crate) metrics: ListenerMetrics,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            reader_factory: None,
            processing_timeout: DEFAULT_PROCESSING_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            recommit_interval: DEFAULT_RECOMMIT_INTERVAL,
            dropped_handler: Arc::new(LogDroppedMessage),
            metrics: ListenerMetrics::default(),
        }
    }
}

impl ListenerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reader_factory(mut self, factory: ReaderFactory) -> Self {
        self.reader_factory = Some(factory);
        self
    }

    /// Convenience over [`with_reader_factory`](Self::with_reader_factory) for a concrete
    /// reader type.
    pub fn with_reader_fn<R, F>(self, build: F) -> Self
    where
        R: BrokerReader + 'static,
        F: Fn() -> Result<R, BrokerError> + Send + Sync + 'static,
    {
        self.with_reader_factory(Arc::new(move || {
            let reader: Arc<dyn BrokerReader> = Arc::new(build()?);
            Ok(reader)
        }))
    }

    /// How long the pump waits for the mailbox slot, and then again for the outcome.
    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    /// Cooldown before replacing the reader after a transient broker error.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn with_recommit_interval(mut self, interval: Duration) -> Self {
        self.recommit_interval = interval;
        self
    }

    pub fn with_dropped_message_handler(mut self, handler: Arc<dyn DroppedMessageHandler>) -> Self {
        self.dropped_handler = handler;
        self
    }

    pub fn with_metrics(mut self, metrics: ListenerMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub(crate) fn take_reader_factory(&mut self) -> ReaderFactory {
        self.reader_factory
            .take()
            .unwrap_or_else(default_reader_factory)
    }
}

fn default_reader_factory() -> ReaderFactory {
    Arc::new(|| {
        let config = KafkaReaderConfig::from_env().map_err(BrokerError::fatal)?;
        let reader: Arc<dyn BrokerReader> = Arc::new(KafkaReader::new(&config)?);
        Ok(reader)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockBroker;

    #[test]
    fn test_defaults() {
        let options = ListenerOptions::new();
        assert!(options.reader_factory.is_none());
        assert_eq!(options.processing_timeout, Duration::from_secs(5));
        assert_eq!(options.reconnect_interval, Duration::from_secs(10));
        assert_eq!(options.recommit_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_builder_overrides() {
        let broker = MockBroker::new();
        let mut options = ListenerOptions::new()
            .with_reader_factory(broker.factory())
            .with_processing_timeout(Duration::from_millis(50))
            .with_reconnect_interval(Duration::from_millis(100))
            .with_recommit_interval(Duration::from_secs(1));

        assert_eq!(options.processing_timeout, Duration::from_millis(50));
        assert_eq!(options.reconnect_interval, Duration::from_millis(100));
        assert_eq!(options.recommit_interval, Duration::from_secs(1));

        let factory = options.take_reader_factory();
        assert!(factory().is_ok());
        assert_eq!(broker.readers_created(), 1);
    }
}
