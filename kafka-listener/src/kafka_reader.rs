use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use envconfig::Envconfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tracing::{debug, info};

use crate::error::{BrokerError, BrokerErrorKind};
use crate::reader::BrokerReader;
use crate::record::Record;

#[derive(Envconfig, Clone)]
pub struct KafkaReaderConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    pub kafka_topic: String,

    #[envconfig(default = "kafka-listener")]
    pub kafka_consumer_group: String,

    // Defaults to "earliest"; a brand new service probably wants "latest"
    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String, // earliest, latest

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    // SASL PLAIN credentials, both or neither
    #[envconfig(from = "KAFKA_USER")]
    pub kafka_user: Option<String>,

    #[envconfig(from = "KAFKA_PASS")]
    pub kafka_pass: Option<String>,

    #[envconfig(default = "4194304")]
    pub kafka_max_partition_fetch_bytes: u32,

    #[envconfig(default = "10000")]
    pub kafka_session_timeout_ms: u32,
}

impl std::fmt::Debug for KafkaReaderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaReaderConfig")
            .field("kafka_hosts", &self.kafka_hosts)
            .field("kafka_topic", &self.kafka_topic)
            .field("kafka_consumer_group", &self.kafka_consumer_group)
            .field(
                "kafka_consumer_offset_reset",
                &self.kafka_consumer_offset_reset,
            )
            .field("kafka_tls", &self.kafka_tls)
            .field("kafka_user", &self.kafka_user)
            .field("kafka_pass", &self.kafka_pass.as_ref().map(|_| "<redacted>"))
            .field(
                "kafka_max_partition_fetch_bytes",
                &self.kafka_max_partition_fetch_bytes,
            )
            .field("kafka_session_timeout_ms", &self.kafka_session_timeout_ms)
            .finish()
    }
}

impl KafkaReaderConfig {
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Self::init_from_env()
    }

    fn sasl_credentials(&self) -> Option<(&str, &str)> {
        match (&self.kafka_user, &self.kafka_pass) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user, pass)),
            _ => None,
        }
    }

    /// Group consumer settings: offsets are stored and committed only by the listener.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.kafka_hosts)
            .set("group.id", &self.kafka_consumer_group)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &self.kafka_consumer_offset_reset)
            .set(
                "session.timeout.ms",
                self.kafka_session_timeout_ms.to_string(),
            )
            .set(
                "max.partition.fetch.bytes",
                self.kafka_max_partition_fetch_bytes.to_string(),
            );

        let sasl = self.sasl_credentials();
        let protocol = match (self.kafka_tls, sasl.is_some()) {
            (false, false) => None,
            (true, false) => Some("ssl"),
            (false, true) => Some("sasl_plaintext"),
            (true, true) => Some("sasl_ssl"),
        };

        if let Some(protocol) = protocol {
            config.set("security.protocol", protocol);
        }
        if self.kafka_tls {
            config.set("enable.ssl.certificate.verification", "false");
        }
        if let Some((user, pass)) = sasl {
            config
                .set("sasl.mechanisms", "PLAIN")
                .set("sasl.username", user)
                .set("sasl.password", pass);
        }

        config
    }
}

/// [`BrokerReader`] over a subscribed rdkafka [`StreamConsumer`].
pub struct KafkaReader {
    consumer: Arc<StreamConsumer>,
    topic: String,
}

impl KafkaReader {
    pub fn new(config: &KafkaReaderConfig) -> Result<Self, BrokerError> {
        let consumer: StreamConsumer = config.client_config().create()?;
        consumer.subscribe(&[config.kafka_topic.as_str()])?;

        info!(
            topic = %config.kafka_topic,
            group = %config.kafka_consumer_group,
            "kafka reader subscribed"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            topic: config.kafka_topic.clone(),
        })
    }
}

#[async_trait]
impl BrokerReader for KafkaReader {
    async fn fetch_next(&self) -> Result<Record, BrokerError> {
        let message = self.consumer.recv().await?;
        Ok(to_record(&message))
    }

    async fn commit(&self, records: &[Record]) -> Result<(), BrokerError> {
        let offsets = next_offsets(records);
        let consumer = self.consumer.clone();

        // Sync commit so a returned Ok means the broker has the offsets.
        let committed = tokio::task::spawn_blocking(move || {
            let mut list = TopicPartitionList::new();
            for (topic, partition, offset) in &offsets {
                list.add_partition_offset(topic, *partition, Offset::Offset(*offset))?;
            }
            consumer.commit(&list, CommitMode::Sync)
        })
        .await
        .map_err(BrokerError::fatal)?;

        committed?;
        debug!(topic = %self.topic, records = records.len(), "committed offsets");
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        // The client itself is destroyed once the last handle is dropped.
        self.consumer.unsubscribe();
        info!(topic = %self.topic, "kafka reader closed");
        Ok(())
    }
}

fn to_record(message: &BorrowedMessage<'_>) -> Record {
    let payload = message
        .payload()
        .map(Bytes::copy_from_slice)
        .unwrap_or_default();

    let mut record = Record::new(
        message.topic(),
        message.partition(),
        message.offset(),
        payload,
    );
    record.key = message.key().map(Bytes::copy_from_slice);
    record.timestamp = message
        .timestamp()
        .to_millis()
        .and_then(DateTime::<Utc>::from_timestamp_millis);
    record
}

/// The offset to commit per (topic, partition): one past the highest record seen.
fn next_offsets(records: &[Record]) -> Vec<(String, i32, i64)> {
    let mut highest: BTreeMap<(&str, i32), i64> = BTreeMap::new();
    for record in records {
        let next = highest
            .entry((record.topic.as_str(), record.partition))
            .or_insert(record.next_offset());
        *next = (*next).max(record.next_offset());
    }

    highest
        .into_iter()
        .map(|((topic, partition), offset)| (topic.to_string(), partition, offset))
        .collect()
}

/// Timeouts and connection-level failures are worth a reconnect; the rest is fatal.
pub fn classify(error: &KafkaError) -> BrokerErrorKind {
    if let KafkaError::MessageConsumptionFatal(_) = error {
        return BrokerErrorKind::Fatal;
    }

    match error.rdkafka_error_code() {
        Some(RDKafkaErrorCode::OperationTimedOut | RDKafkaErrorCode::RequestTimedOut) => {
            BrokerErrorKind::Timeout
        }
        Some(
            RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::BrokerNotAvailable
            | RDKafkaErrorCode::NetworkException
            | RDKafkaErrorCode::Resolve
            | RDKafkaErrorCode::LeaderNotAvailable
            | RDKafkaErrorCode::NotLeaderForPartition
            | RDKafkaErrorCode::CoordinatorLoadInProgress
            | RDKafkaErrorCode::CoordinatorNotAvailable
            | RDKafkaErrorCode::NotCoordinator
            | RDKafkaErrorCode::RebalanceInProgress,
        ) => BrokerErrorKind::Temporary,
        _ => BrokerErrorKind::Fatal,
    }
}

impl From<KafkaError> for BrokerError {
    fn from(error: KafkaError) -> Self {
        BrokerError::new(classify(&error), error)
    }
}
