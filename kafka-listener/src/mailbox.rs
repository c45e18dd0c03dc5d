use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::debug;

/// One payload handed to the processor, tagged with its delivery sequence number.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub seq: u64,
    pub payload: Bytes,
}

impl Delivery {
    pub fn outcome(&self, result: anyhow::Result<()>) -> Outcome {
        Outcome {
            seq: self.seq,
            result,
        }
    }

    pub fn ok(&self) -> Outcome {
        self.outcome(Ok(()))
    }

    pub fn failed(&self, error: impl Into<anyhow::Error>) -> Outcome {
        self.outcome(Err(error.into()))
    }
}

/// What the processor reports back for a [`Delivery`].
///
/// `seq` must echo the delivery's sequence number. Outcomes that do not match the
/// delivery the listener is waiting on are ignored.
#[derive(Debug)]
pub struct Outcome {
    pub seq: u64,
    pub result: anyhow::Result<()>,
}

/// The processor's half of the mailbox.
///
/// Receive a [`Delivery`] from `deliveries`, process it, then send exactly one [`Outcome`]
/// built from it on `outcomes`. `deliveries` yields `None` once the listener has shut down.
pub struct MailboxHandle {
    pub deliveries: mpsc::Receiver<Delivery>,
    pub outcomes: mpsc::Sender<Outcome>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Placement {
    Placed(u64),
    /// The previous delivery is still unread.
    Full,
    Closed,
}

#[derive(Debug)]
pub(crate) enum Feedback {
    Outcome(anyhow::Result<()>),
    TimedOut,
    Closed,
}

/// Single-slot delivery channel plus single-slot outcome channel between the pump and
/// the processor. Both are closed once, by shutdown.
pub(crate) struct Mailbox {
    delivery_tx: Mutex<Option<mpsc::Sender<Delivery>>>,
    outcome_rx: AsyncMutex<mpsc::Receiver<Outcome>>,
    processor_half: Mutex<Option<MailboxHandle>>,
    next_seq: AtomicU64,
}

impl Mailbox {
    pub(crate) fn new() -> Self {
        let (delivery_tx, deliveries) = mpsc::channel(1);
        let (outcomes, outcome_rx) = mpsc::channel(1);

        Self {
            delivery_tx: Mutex::new(Some(delivery_tx)),
            outcome_rx: AsyncMutex::new(outcome_rx),
            processor_half: Mutex::new(Some(MailboxHandle {
                deliveries,
                outcomes,
            })),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Hands out the processor's half. Only the first call gets it.
    pub(crate) fn take_handle(&self) -> Option<MailboxHandle> {
        self.processor_half.lock().take()
    }

    /// Non-blocking: true once shutdown closed the mailbox or the processor dropped its
    /// delivery receiver.
    pub(crate) fn is_closed(&self) -> bool {
        match &*self.delivery_tx.lock() {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }

    /// Try to put `payload` into the slot, waiting at most `timeout` for it to free up.
    pub(crate) async fn place(&self, payload: Bytes, timeout: Duration) -> Placement {
        let Some(tx) = self.delivery_tx.lock().clone() else {
            return Placement::Closed;
        };

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        match tx.send_timeout(Delivery { seq, payload }, timeout).await {
            Ok(()) => Placement::Placed(seq),
            Err(SendTimeoutError::Timeout(_)) if self.is_closed() => Placement::Closed,
            Err(SendTimeoutError::Timeout(_)) => Placement::Full,
            Err(SendTimeoutError::Closed(_)) => Placement::Closed,
        }
    }

    /// Wait at most `timeout` for the outcome of delivery `seq`, skipping outcomes that
    /// belong to earlier deliveries.
    pub(crate) async fn await_outcome(&self, seq: u64, timeout: Duration) -> Feedback {
        let deadline = Instant::now() + timeout;
        let mut outcomes = self.outcome_rx.lock().await;

        loop {
            match tokio::time::timeout_at(deadline, outcomes.recv()).await {
                Ok(Some(outcome)) if outcome.seq == seq => {
                    return Feedback::Outcome(outcome.result);
                }
                Ok(Some(outcome)) => {
                    debug!(expected = seq, received = outcome.seq, "ignoring late outcome");
                }
                Ok(None) => return Feedback::Closed,
                Err(_) => return Feedback::TimedOut,
            }
        }
    }

    /// Drop outcomes the processor sent after their delivery had already timed out, so
    /// the processor is not left blocked on a full outcome slot.
    pub(crate) fn discard_stale_outcomes(&self) -> usize {
        let Ok(mut outcomes) = self.outcome_rx.try_lock() else {
            return 0;
        };

        let mut discarded = 0;
        while outcomes.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }

    pub(crate) async fn close(&self) {
        drop(self.delivery_tx.lock().take());
        drop(self.processor_half.lock().take());
        self.outcome_rx.lock().await.close();
    }
}
