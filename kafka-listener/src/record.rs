use bytes::Bytes;
use chrono::{DateTime, Utc};

/// One message fetched from the broker: an opaque payload plus its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Bytes,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, payload: Bytes) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: None,
            payload,
            timestamp: None,
        }
    }

    pub fn with_key(mut self, key: Bytes) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// The offset a consumer group should store to resume right after this record.
    pub fn next_offset(&self) -> i64 {
        self.offset + 1
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}@{}", self.topic, self.partition, self.offset)
    }
}
