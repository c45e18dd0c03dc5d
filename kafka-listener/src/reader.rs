use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::BrokerError;
use crate::record::Record;

/// The three broker operations the listener relies on.
///
/// Implementations must be usable from two tasks at once: the pump calls `fetch_next`
/// while the commit path calls `commit`. The listener never issues two `commit` calls
/// concurrently, and never issues two `fetch_next` calls concurrently.
#[async_trait]
pub trait BrokerReader: Send + Sync {
    /// Wait for the next record. Dropping the future abandons the fetch.
    async fn fetch_next(&self) -> Result<Record, BrokerError>;

    /// Commit the offsets of `records`, in order.
    async fn commit(&self, records: &[Record]) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// Builds a fresh reader, at startup and on every reconnect.
pub type ReaderFactory =
    Arc<dyn Fn() -> Result<Arc<dyn BrokerReader>, BrokerError> + Send + Sync + 'static>;

/// Holds the one active reader handle.
///
/// Only the pump replaces the handle (on reconnect). Everyone else clones the current
/// `Arc` out and never holds the lock across an await.
pub(crate) struct ReaderSlot {
    current: RwLock<Arc<dyn BrokerReader>>,
}

impl ReaderSlot {
    pub(crate) fn new(reader: Arc<dyn BrokerReader>) -> Self {
        Self {
            current: RwLock::new(reader),
        }
    }

    pub(crate) fn current(&self) -> Arc<dyn BrokerReader> {
        self.current.read().clone()
    }

    /// Install `reader` and hand back the one it replaced.
    pub(crate) fn replace(&self, reader: Arc<dyn BrokerReader>) -> Arc<dyn BrokerReader> {
        std::mem::replace(&mut *self.current.write(), reader)
    }
}
