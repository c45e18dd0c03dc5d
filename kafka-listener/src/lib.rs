//! Resilient single-consumer Kafka listener.
//!
//! A [`Listener`] pulls one record at a time from a broker reader and pushes its payload
//! to a downstream processor through a single-slot mailbox. Every delivery carries a
//! sequence number that the processor echoes back in its outcome. Acknowledged records are
//! committed in batches, transient broker failures are recovered by replacing the reader,
//! and shutdown flushes pending commits before closing everything down.
//!
//! ## Error logging
//!
//! Log errors with their cause chain: `error = ?e` as a structured field, or `{e:#}` inline.
//! Display (`%e`) only shows the top-level message.

pub mod commit;
pub mod config;
pub mod dropped;
pub mod error;
pub mod kafka_reader;
pub mod listener;
pub mod mailbox;
pub mod metrics_consts;
pub mod options;
pub mod reader;
pub mod record;
pub mod test_utils;

mod pump;
mod recovery;

pub use dropped::{DropReason, DroppedMessageHandler, LogDroppedMessage};
pub use error::{BrokerError, BrokerErrorKind, ListenerError};
pub use kafka_reader::{KafkaReader, KafkaReaderConfig};
pub use listener::Listener;
pub use mailbox::{Delivery, MailboxHandle, Outcome};
pub use metrics_consts::ListenerMetrics;
pub use options::ListenerOptions;
pub use reader::{BrokerReader, ReaderFactory};
pub use record::Record;
