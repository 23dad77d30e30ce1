use chrono::{DateTime, Utc};

#[cfg(unix)]
use rdkafka::Message;

use super::TopicPartition;

/// A record consumed from a Topic Partition, detached from the client that fetched it.
///
/// This is what gets handed to the ETL callback: payload transformation is not a concern
/// of this crate, so the payload is kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub topic: String,
    pub partition: u32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    /// Timestamp assigned by the producer or the broker, if any.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Record {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// Record key, decoded as UTF-8.
    ///
    /// Returns an empty string if the key is missing or not valid UTF-8.
    pub fn key_str(&self) -> &str {
        self.key.as_deref().and_then(|k| std::str::from_utf8(k).ok()).unwrap_or_default()
    }

    /// Size of the payload in bytes (`0` for tombstones).
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map(Vec::len).unwrap_or(0)
    }
}

#[cfg(unix)]
impl<M: Message> From<&M> for Record {
    fn from(m: &M) -> Self {
        Record {
            topic: m.topic().to_owned(),
            partition: m.partition() as u32,
            offset: m.offset(),
            key: m.key().map(<[u8]>::to_vec),
            payload: m.payload().map(<[u8]>::to_vec),
            timestamp: m.timestamp().to_millis().and_then(DateTime::<Utc>::from_timestamp_millis),
        }
    }
}
