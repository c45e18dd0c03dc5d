use std::time::Duration;

use envconfig::Envconfig;

use crate::kafka_reader::{KafkaReader, KafkaReaderConfig};
use crate::options::ListenerOptions;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(nested = true)]
    pub kafka: KafkaReaderConfig,

    // How long to wait for the processor to take a payload, and then for its outcome
    #[envconfig(default = "5000")]
    pub processing_timeout_ms: u64,

    #[envconfig(default = "10000")]
    pub reconnect_interval_ms: u64,

    #[envconfig(default = "5000")]
    pub recommit_interval_ms: u64,

    #[envconfig(default = "30")]
    pub shutdown_timeout_secs: u64,

    // HTTP server configuration
    #[envconfig(default = "0.0.0.0:8080")]
    pub bind_address: String,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,
}

impl Config {
    /// Initialize from environment variables (for production and tests)
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Listener options backed by a [`KafkaReader`] built from this config on every
    /// (re)connect.
    pub fn to_listener_options(&self) -> ListenerOptions {
        let kafka = self.kafka.clone();

        ListenerOptions::new()
            .with_reader_fn(move || KafkaReader::new(&kafka))
            .with_processing_timeout(Duration::from_millis(self.processing_timeout_ms))
            .with_reconnect_interval(Duration::from_millis(self.reconnect_interval_ms))
            .with_recommit_interval(Duration::from_millis(self.recommit_interval_ms))
    }
}
