use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use crate::record::Record;

/// Why a record never reached a committed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The mailbox still held the previous payload when this record arrived.
    Backpressure,
    /// The payload was delivered but no outcome came back within the processing timeout.
    AckTimeout,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Backpressure => "backpressure",
            DropReason::AckTimeout => "ack_timeout",
        }
    }
}

/// Called for every dropped record. Errors are logged by the listener and never abort it.
#[async_trait]
pub trait DroppedMessageHandler: Send + Sync {
    async fn handle_dropped(&self, record: &Record, reason: DropReason) -> Result<()>;
}

/// Default handler: logs the dropped record's position.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDroppedMessage;

#[async_trait]
impl DroppedMessageHandler for LogDroppedMessage {
    async fn handle_dropped(&self, record: &Record, reason: DropReason) -> Result<()> {
        warn!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            payload_bytes = record.payload.len(),
            reason = reason.as_str(),
            "message dropped"
        );
        Ok(())
    }
}
