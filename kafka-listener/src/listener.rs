use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::commit::CommitBatcher;
use crate::dropped::DroppedMessageHandler;
use crate::error::ListenerError;
use crate::mailbox::{Mailbox, MailboxHandle};
use crate::metrics_consts::ListenerMetrics;
use crate::options::ListenerOptions;
use crate::reader::{ReaderFactory, ReaderSlot};

/// Pulls records from a broker reader and pushes their payloads to a processor.
///
/// The processor side is obtained once through [`Listener::mailbox`]. [`Listener::run`]
/// drives fetching, handoff and periodic commits until [`Listener::shutdown`] is called,
/// the ambient token is cancelled, or a fatal broker error occurs. The handle is cheap to
/// clone so `run` and `shutdown` can live on different tasks.
#[derive(Clone)]
pub struct Listener {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) reader: ReaderSlot,
    pub(crate) reader_factory: ReaderFactory,
    pub(crate) batcher: CommitBatcher,
    pub(crate) mailbox: Mailbox,
    /// Cooperative shutdown signal, cancelled once by `shutdown`.
    pub(crate) shutdown: CancellationToken,
    shutdown_started: AtomicBool,
    pub(crate) dropped_handler: Arc<dyn DroppedMessageHandler>,
    pub(crate) metrics: ListenerMetrics,
    pub(crate) processing_timeout: Duration,
    pub(crate) reconnect_interval: Duration,
    recommit_interval: Duration,
}

impl Listener {
    /// Build the listener and its first reader.
    pub fn new(mut options: ListenerOptions) -> Result<Self, ListenerError> {
        let reader_factory = options.take_reader_factory();
        let reader = reader_factory().map_err(ListenerError::ReaderInit)?;

        let ListenerOptions {
            processing_timeout,
            reconnect_interval,
            recommit_interval,
            dropped_handler,
            metrics,
            ..
        } = options;

        let batcher = CommitBatcher::new(
            metrics.messages_processed.clone(),
            metrics.broker_errors.clone(),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                reader: ReaderSlot::new(reader),
                reader_factory,
                batcher,
                mailbox: Mailbox::new(),
                shutdown: CancellationToken::new(),
                shutdown_started: AtomicBool::new(false),
                dropped_handler,
                metrics,
                processing_timeout,
                reconnect_interval,
                recommit_interval,
            }),
        })
    }

    /// The processor's half of the mailbox. Returns `None` after the first call.
    pub fn mailbox(&self) -> Option<MailboxHandle> {
        self.inner.mailbox.take_handle()
    }

    /// Acknowledged records whose offsets have not been committed yet.
    pub async fn pending_commits(&self) -> usize {
        self.inner.batcher.pending_len().await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Run the pump and the periodic commit loop until the listener stops.
    ///
    /// Returns `Ok(())` on shutdown, on cancellation of `cancel`, and when the processor
    /// drops its mailbox half. A fatal broker error is returned as is; the commit loop is
    /// aborted in that case so no further commits are attempted.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ListenerError> {
        let stop_commits = cancel.child_token();
        let commit_loop = {
            let inner = self.inner.clone();
            let stop = stop_commits.clone();
            tokio::spawn(async move {
                inner
                    .batcher
                    .run_timer(
                        &inner.reader,
                        inner.recommit_interval,
                        &inner.shutdown,
                        &stop,
                    )
                    .await;
            })
        };

        info!(
            processing_timeout_ms = self.inner.processing_timeout.as_millis() as u64,
            recommit_interval_ms = self.inner.recommit_interval.as_millis() as u64,
            "listener started"
        );

        let result = self.inner.pump(&cancel).await;

        match &result {
            Ok(()) => {
                stop_commits.cancel();
                if let Err(e) = commit_loop.await {
                    error!(error = ?e, "commit loop task failed");
                }
                info!("listener stopped");
            }
            Err(e) => {
                commit_loop.abort();
                error!(error = ?e, "listener stopped on unrecoverable error");
            }
        }

        result
    }

    /// Stop the listener: signal every loop, commit what is pending, close the reader and
    /// then the mailbox.
    ///
    /// Only the first call does anything; later calls return `Ok(())`. A failed final
    /// commit is logged and left for redelivery. A failed close is returned.
    pub async fn shutdown(&self) -> Result<(), ListenerError> {
        let inner = &self.inner;
        if inner.shutdown_started.swap(true, Ordering::SeqCst) {
            debug!("shutdown already in progress");
            return Ok(());
        }

        info!("listener shutting down");
        inner.shutdown.cancel();

        match inner.batcher.flush(&inner.reader).await {
            Ok(committed) => info!(committed, "committed pending offsets before shutdown"),
            Err(e) => error!(error = ?e, "failed to commit pending offsets on shutdown"),
        }

        let closed = {
            let _commits_paused = inner.batcher.pause().await;
            inner.reader.current().close().await
        };

        // Channels close last so the processor never sees them closed mid-flush.
        inner.mailbox.close().await;

        if let Err(e) = closed {
            inner.metrics.broker_errors.increment(1);
            error!(error = ?e, "failed to close broker reader");
            return Err(ListenerError::Close(e));
        }

        info!("listener shut down");
        Ok(())
    }
}
