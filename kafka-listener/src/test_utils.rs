use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use metrics::Counter;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::dropped::{DropReason, DroppedMessageHandler};
use crate::error::BrokerError;
use crate::metrics_consts::ListenerMetrics;
use crate::options::ListenerOptions;
use crate::reader::{BrokerReader, ReaderFactory};
use crate::record::Record;

pub const TEST_TOPIC: &str = "events";

/// A record on partition 0 of the test topic whose payload names its offset.
pub fn record(offset: i64) -> Record {
    Record::new(
        TEST_TOPIC,
        0,
        offset,
        Bytes::from(format!("payload-{offset}")),
    )
}

pub enum FetchStep {
    Record(Record),
    Error(BrokerError),
}

#[derive(Debug, Clone)]
pub struct CommitCall {
    pub reader_id: usize,
    pub records: Vec<Record>,
    pub succeeded: bool,
}

impl CommitCall {
    pub fn offsets(&self) -> Vec<i64> {
        self.records.iter().map(|r| r.offset).collect()
    }
}

#[derive(Default)]
struct BrokerState {
    fetches: VecDeque<FetchStep>,
    commit_failures: VecDeque<BrokerError>,
    close_failures: VecDeque<BrokerError>,
    factory_failures: VecDeque<BrokerError>,
    commit_calls: Vec<CommitCall>,
    fetch_calls: usize,
    readers_created: usize,
    closed_readers: Vec<usize>,
    commit_gate: Option<Arc<Notify>>,
    held_commits: usize,
}

/// Scripted in-memory broker. Every reader it hands out shares the same script and log,
/// so tests can follow commits and fetches across reconnects.
///
/// `fetch_next` waits while the script is empty, like a real consumer on an idle topic.
#[derive(Default)]
pub struct MockBroker {
    state: Mutex<BrokerState>,
    fetch_ready: Notify,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_records(&self, records: impl IntoIterator<Item = Record>) {
        self.state
            .lock()
            .fetches
            .extend(records.into_iter().map(FetchStep::Record));
        self.fetch_ready.notify_waiters();
    }

    pub fn fail_next_fetch(&self, error: BrokerError) {
        self.state.lock().fetches.push_back(FetchStep::Error(error));
        self.fetch_ready.notify_waiters();
    }

    pub fn fail_next_commit(&self, error: BrokerError) {
        self.state.lock().commit_failures.push_back(error);
    }

    pub fn fail_next_close(&self, error: BrokerError) {
        self.state.lock().close_failures.push_back(error);
    }

    pub fn fail_next_reader(&self, error: BrokerError) {
        self.state.lock().factory_failures.push_back(error);
    }

    /// Make every commit call wait until [`release_commits`](Self::release_commits).
    pub fn hold_commits(&self) {
        self.state.lock().commit_gate = Some(Arc::new(Notify::new()));
    }

    pub fn release_commits(&self) {
        if let Some(gate) = self.state.lock().commit_gate.take() {
            gate.notify_waiters();
        }
    }

    /// Commit calls currently waiting on the gate.
    pub fn held_commits(&self) -> usize {
        self.state.lock().held_commits
    }

    pub fn reader(self: &Arc<Self>) -> Arc<dyn BrokerReader> {
        let mut state = self.state.lock();
        state.readers_created += 1;
        Arc::new(MockReader {
            id: state.readers_created,
            broker: self.clone(),
        })
    }

    pub fn factory(self: &Arc<Self>) -> ReaderFactory {
        let broker = self.clone();
        Arc::new(move || {
            if let Some(error) = broker.state.lock().factory_failures.pop_front() {
                return Err(error);
            }
            Ok(broker.reader())
        })
    }

    pub fn commit_calls(&self) -> Vec<CommitCall> {
        self.state.lock().commit_calls.clone()
    }

    /// Offsets of every successful commit call, in call order.
    pub fn committed_offsets(&self) -> Vec<i64> {
        self.state
            .lock()
            .commit_calls
            .iter()
            .filter(|call| call.succeeded)
            .flat_map(|call| call.offsets())
            .collect()
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.lock().fetch_calls
    }

    pub fn readers_created(&self) -> usize {
        self.state.lock().readers_created
    }

    pub fn closed_readers(&self) -> Vec<usize> {
        self.state.lock().closed_readers.clone()
    }

    pub fn queued_fetches(&self) -> usize {
        self.state.lock().fetches.len()
    }
}

pub struct MockReader {
    id: usize,
    broker: Arc<MockBroker>,
}

#[async_trait]
impl BrokerReader for MockReader {
    async fn fetch_next(&self) -> Result<Record, BrokerError> {
        self.broker.state.lock().fetch_calls += 1;

        loop {
            let ready = self.broker.fetch_ready.notified();
            let step = self.broker.state.lock().fetches.pop_front();
            if let Some(step) = step {
                return match step {
                    FetchStep::Record(record) => Ok(record),
                    FetchStep::Error(error) => Err(error),
                };
            }
            ready.await;
        }
    }

    async fn commit(&self, records: &[Record]) -> Result<(), BrokerError> {
        let gate = self.broker.state.lock().commit_gate.clone();
        if let Some(gate) = gate {
            let released = gate.notified();
            self.broker.state.lock().held_commits += 1;
            released.await;
            self.broker.state.lock().held_commits -= 1;
        }

        let mut state = self.broker.state.lock();
        let failure = state.commit_failures.pop_front();
        state.commit_calls.push(CommitCall {
            reader_id: self.id,
            records: records.to_vec(),
            succeeded: failure.is_none(),
        });
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        let mut state = self.broker.state.lock();
        state.closed_readers.push(self.id);
        match state.close_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Counters backed by plain atomics so tests can read them.
#[derive(Default, Clone)]
pub struct TestCounters {
    pub processed: Arc<AtomicU64>,
    pub dropped: Arc<AtomicU64>,
    pub broker_errors: Arc<AtomicU64>,
    pub ack_timeout: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
    pub reconnects: Arc<AtomicU64>,
    pub dropped_handler_errors: Arc<AtomicU64>,
}

impl TestCounters {
    pub fn metrics(&self) -> ListenerMetrics {
        ListenerMetrics {
            messages_processed: Counter::from_arc(self.processed.clone()),
            messages_dropped: Counter::from_arc(self.dropped.clone()),
            broker_errors: Counter::from_arc(self.broker_errors.clone()),
            messages_ack_timeout: Counter::from_arc(self.ack_timeout.clone()),
            messages_failed: Counter::from_arc(self.failed.clone()),
            reconnects: Counter::from_arc(self.reconnects.clone()),
            dropped_handler_errors: Counter::from_arc(self.dropped_handler_errors.clone()),
        }
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }
}

// Test implementation of DroppedMessageHandler that tracks calls
#[derive(Default)]
pub struct RecordingDroppedHandler {
    dropped: Mutex<Vec<(i64, DropReason)>>,
    fail: AtomicBool,
}

impl RecordingDroppedHandler {
    pub fn failing() -> Self {
        Self {
            dropped: Mutex::new(Vec::new()),
            fail: AtomicBool::new(true),
        }
    }

    pub fn dropped(&self) -> Vec<(i64, DropReason)> {
        self.dropped.lock().clone()
    }
}

#[async_trait]
impl DroppedMessageHandler for RecordingDroppedHandler {
    async fn handle_dropped(&self, record: &Record, reason: DropReason) -> Result<()> {
        self.dropped.lock().push((record.offset, reason));
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("dead letter queue unavailable");
        }
        Ok(())
    }
}

pub const TEST_PROCESSING_TIMEOUT: Duration = Duration::from_millis(50);
pub const TEST_RECONNECT_INTERVAL: Duration = Duration::from_millis(100);
pub const TEST_RECOMMIT_INTERVAL: Duration = Duration::from_secs(10);

/// Options wired to the mock broker, with short timeouts.
pub fn test_options(
    broker: &Arc<MockBroker>,
    counters: &TestCounters,
    dropped: Arc<RecordingDroppedHandler>,
) -> ListenerOptions {
    ListenerOptions::new()
        .with_reader_factory(broker.factory())
        .with_processing_timeout(TEST_PROCESSING_TIMEOUT)
        .with_reconnect_interval(TEST_RECONNECT_INTERVAL)
        .with_recommit_interval(TEST_RECOMMIT_INTERVAL)
        .with_dropped_message_handler(dropped)
        .with_metrics(counters.metrics())
}
