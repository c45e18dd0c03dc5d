use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{BrokerError, ListenerError};
use crate::listener::Inner;

impl Inner {
    /// Decide what a failed fetch or commit means for the pump.
    ///
    /// Transient errors cool down for the reconnect interval and then replace the reader;
    /// `Ok(())` tells the caller to carry on with the next fetch. Anything else comes back
    /// as an error: a fatal [`ListenerError::Broker`], or one of the graceful-stop values
    /// when shutdown or cancellation won the race against the cooldown.
    pub(crate) async fn handle_broker_error(
        &self,
        error: BrokerError,
        cancel: &CancellationToken,
    ) -> Result<(), ListenerError> {
        if !error.is_transient() {
            return Err(ListenerError::Broker(error));
        }

        info!(
            error = ?error,
            reconnect_in_ms = self.reconnect_interval.as_millis() as u64,
            "recoverable broker error, reconnecting after cooldown"
        );

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(ListenerError::ExitProcessingLoop),
            _ = cancel.cancelled() => Err(ListenerError::Cancelled),
            _ = tokio::time::sleep(self.reconnect_interval) => self.reconnect().await,
        }
    }

    /// Close the current reader and install a fresh one from the factory.
    async fn reconnect(&self) -> Result<(), ListenerError> {
        // No commit may run against a reader while it is being swapped out.
        let _commits_paused = self.batcher.pause().await;

        let stale = self.reader.current();
        if let Err(e) = stale.close().await {
            self.metrics.broker_errors.increment(1);
            error!(error = ?e, "failed to close broker reader before reconnecting");
        }

        let fresh = (self.reader_factory)().map_err(ListenerError::Reconnect)?;
        drop(self.reader.replace(fresh));

        self.metrics.reconnects.increment(1);
        info!("reconnected to broker");
        Ok(())
    }
}
