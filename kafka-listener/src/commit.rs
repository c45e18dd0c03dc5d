use std::time::Duration;

use metrics::Counter;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::BrokerError;
use crate::reader::ReaderSlot;
use crate::record::Record;

/// Acknowledged records waiting for their offsets to be committed, in acknowledgment order.
#[derive(Debug, Default)]
pub struct PendingBatch {
    records: Vec<Record>,
}

impl PendingBatch {
    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn clear(&mut self) {
        self.records.clear();
    }
}

/// Commits acknowledged offsets in batches.
///
/// Every touch of the pending batch goes through one async mutex, and the mutex stays held
/// for the whole commit call, so at most one commit is in flight against the reader.
pub struct CommitBatcher {
    pending: Mutex<PendingBatch>,
    messages_processed: Counter,
    broker_errors: Counter,
}

impl CommitBatcher {
    pub fn new(messages_processed: Counter, broker_errors: Counter) -> Self {
        Self {
            pending: Mutex::new(PendingBatch::default()),
            messages_processed,
            broker_errors,
        }
    }

    /// Append an acknowledged record and try to commit everything pending right away.
    pub(crate) async fn append_and_flush(
        &self,
        record: Record,
        reader: &ReaderSlot,
    ) -> Result<usize, BrokerError> {
        let mut pending = self.pending.lock().await;
        pending.push(record);
        self.flush_locked(&mut pending, reader).await
    }

    /// Commit everything pending. Returns how many records were committed.
    pub(crate) async fn flush(&self, reader: &ReaderSlot) -> Result<usize, BrokerError> {
        let mut pending = self.pending.lock().await;
        self.flush_locked(&mut pending, reader).await
    }

    /// Block commits while the caller holds the guard (used to swap the reader).
    pub(crate) async fn pause(&self) -> MutexGuard<'_, PendingBatch> {
        self.pending.lock().await
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn flush_locked(
        &self,
        pending: &mut PendingBatch,
        reader: &ReaderSlot,
    ) -> Result<usize, BrokerError> {
        if pending.is_empty() {
            return Ok(0);
        }

        let reader = reader.current();
        match reader.commit(pending.records()).await {
            Ok(()) => {
                let committed = pending.len();
                self.messages_processed.increment(committed as u64);
                pending.clear();
                debug!(committed, "committed pending offsets");
                Ok(committed)
            }
            Err(e) => {
                // The batch stays as it is so the same records go out on the next flush.
                self.broker_errors.increment(1);
                Err(e)
            }
        }
    }

    /// Flush on a fixed interval until `shutdown` or `cancel` fires, then flush once more.
    pub(crate) async fn run_timer(
        &self,
        reader: &ReaderSlot,
        recommit_interval: Duration,
        shutdown: &CancellationToken,
        cancel: &CancellationToken,
    ) {
        let mut ticker = interval_at(Instant::now() + recommit_interval, recommit_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.flush(reader).await {
                        error!(error = ?e, "periodic offset commit failed");
                    }
                }
            }
        }

        info!("commit loop stopping, flushing pending offsets");
        if let Err(e) = self.flush(reader).await {
            error!(error = ?e, "final offset commit failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::test_utils::{record, MockBroker};

    struct Fixture {
        broker: Arc<MockBroker>,
        slot: ReaderSlot,
        batcher: CommitBatcher,
        processed: Arc<AtomicU64>,
        errors: Arc<AtomicU64>,
    }

    fn fixture() -> Fixture {
        let broker = MockBroker::new();
        let slot = ReaderSlot::new(broker.reader());
        let processed = Arc::new(AtomicU64::new(0));
        let errors = Arc::new(AtomicU64::new(0));
        let batcher = CommitBatcher::new(
            Counter::from_arc(processed.clone()),
            Counter::from_arc(errors.clone()),
        );
        Fixture {
            broker,
            slot,
            batcher,
            processed,
            errors,
        }
    }

    #[tokio::test]
    async fn test_flush_of_empty_batch_makes_no_commit_call() {
        let f = fixture();

        assert_eq!(f.batcher.flush(&f.slot).await.unwrap(), 0);
        assert!(f.broker.commit_calls().is_empty());
    }

    #[tokio::test]
    async fn test_append_commits_immediately() {
        let f = fixture();

        let committed = f
            .batcher
            .append_and_flush(record(0), &f.slot)
            .await
            .unwrap();

        assert_eq!(committed, 1);
        assert_eq!(f.broker.committed_offsets(), vec![0]);
        assert_eq!(f.batcher.pending_len().await, 0);
        assert_eq!(f.processed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_batch_for_retry_in_order() {
        let f = fixture();
        f.broker.fail_next_commit(BrokerError::temporary("coordinator loading"));

        let err = f
            .batcher
            .append_and_flush(record(0), &f.slot)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(f.batcher.pending_len().await, 1);
        assert_eq!(f.errors.load(Ordering::SeqCst), 1);
        assert_eq!(f.processed.load(Ordering::SeqCst), 0);

        f.batcher
            .append_and_flush(record(1), &f.slot)
            .await
            .unwrap();

        let calls = f.broker.commit_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].offsets(), vec![0]);
        assert!(!calls[0].succeeded);
        assert_eq!(calls[1].offsets(), vec![0, 1]);
        assert!(calls[1].succeeded);
        assert_eq!(f.batcher.pending_len().await, 0);
        assert_eq!(f.processed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_on_interval_and_drains_on_stop() {
        let f = Arc::new(fixture());
        f.broker.fail_next_commit(BrokerError::timeout("commit timed out"));

        // Leaves record 0 pending after the failed immediate flush.
        assert!(f
            .batcher
            .append_and_flush(record(0), &f.slot)
            .await
            .is_err());

        let shutdown = CancellationToken::new();
        let cancel = CancellationToken::new();
        let timer = {
            let f = f.clone();
            let shutdown = shutdown.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                f.batcher
                    .run_timer(&f.slot, Duration::from_secs(1), &shutdown, &cancel)
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(f.broker.committed_offsets(), vec![0]);

        // Pending at stop time: drained by the final flush.
        f.batcher.pause().await.push(record(1));
        shutdown.cancel();
        timer.await.unwrap();

        assert_eq!(f.broker.committed_offsets(), vec![0, 1]);
    }
}
