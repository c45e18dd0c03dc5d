use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::dropped::DropReason;
use crate::error::ListenerError;
use crate::listener::Inner;
use crate::mailbox::{Feedback, Placement};
use crate::record::Record;

impl Inner {
    /// Fetch and hand off records until shutdown, cancellation, a closed mailbox or a
    /// fatal broker error.
    pub(crate) async fn pump(&self, cancel: &CancellationToken) -> Result<(), ListenerError> {
        loop {
            if self.shutdown.is_cancelled() || cancel.is_cancelled() || self.mailbox.is_closed() {
                return Ok(());
            }

            match self.process_tick(cancel).await {
                Ok(()) => {}
                Err(e) if e.is_graceful_stop() => {
                    debug!(reason = %e, "processing loop unwound");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn process_tick(&self, cancel: &CancellationToken) -> Result<(), ListenerError> {
        let reader = self.reader.current();

        let fetched = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(ListenerError::ExitProcessingLoop),
            _ = cancel.cancelled() => return Err(ListenerError::Cancelled),
            fetched = reader.fetch_next() => fetched,
        };
        drop(reader);

        match fetched {
            Ok(record) => self.hand_off(record, cancel).await,
            Err(e) => {
                self.metrics.broker_errors.increment(1);
                warn!(error = ?e, "failed to fetch next message");
                self.handle_broker_error(e, cancel).await
            }
        }
    }

    /// Deliver one record to the processor and act on what comes back.
    ///
    /// Two waits, each bounded by the processing timeout: one for the mailbox slot, one
    /// for the outcome of this delivery. A record ends up acknowledged (and committed),
    /// skipped after a processing failure, or dropped.
    async fn hand_off(
        &self,
        record: Record,
        cancel: &CancellationToken,
    ) -> Result<(), ListenerError> {
        let stale = self.mailbox.discard_stale_outcomes();
        if stale > 0 {
            debug!(stale, "discarded late outcomes from timed out deliveries");
        }

        let timeout = self.processing_timeout;
        let placement = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(ListenerError::ExitProcessingLoop),
            _ = cancel.cancelled() => return Err(ListenerError::Cancelled),
            placement = self.mailbox.place(record.payload.clone(), timeout) => placement,
        };

        let seq = match placement {
            Placement::Placed(seq) => seq,
            Placement::Closed => return Err(ListenerError::ExitProcessingLoop),
            Placement::Full => {
                self.metrics.messages_dropped.increment(1);
                self.report_dropped(&record, DropReason::Backpressure).await;
                return Ok(());
            }
        };

        let feedback = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(ListenerError::ExitProcessingLoop),
            _ = cancel.cancelled() => return Err(ListenerError::Cancelled),
            feedback = self.mailbox.await_outcome(seq, timeout) => feedback,
        };

        match feedback {
            Feedback::Outcome(Ok(())) => self.acknowledge(record, cancel).await,
            Feedback::Outcome(Err(e)) => {
                self.metrics.messages_failed.increment(1);
                error!(
                    error = ?e,
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    "failed to process message, skipping it"
                );
                Ok(())
            }
            Feedback::TimedOut => {
                self.metrics.messages_ack_timeout.increment(1);
                self.report_dropped(&record, DropReason::AckTimeout).await;
                Ok(())
            }
            Feedback::Closed => Err(ListenerError::ExitProcessingLoop),
        }
    }

    async fn acknowledge(
        &self,
        record: Record,
        cancel: &CancellationToken,
    ) -> Result<(), ListenerError> {
        let (partition, offset) = (record.partition, record.offset);

        match self.batcher.append_and_flush(record, &self.reader).await {
            Ok(committed) => {
                debug!(partition, offset, committed, "message acknowledged");
                Ok(())
            }
            Err(e) => {
                warn!(error = ?e, partition, offset, "failed to commit acknowledged offsets");
                self.handle_broker_error(e, cancel).await
            }
        }
    }

    async fn report_dropped(&self, record: &Record, reason: DropReason) {
        debug!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            reason = reason.as_str(),
            "dropping message"
        );

        if let Err(e) = self.dropped_handler.handle_dropped(record, reason).await {
            self.metrics.dropped_handler_errors.increment(1);
            error!(
                error = ?e,
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "dropped message handler failed"
            );
        }
    }
}
