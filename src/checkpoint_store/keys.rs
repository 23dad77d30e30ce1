use serde_json::{Map, Value};

use super::errors::{CheckpointStoreError, CheckpointStoreResult};
use crate::kafka_types::TopicPartition;

/// Layout of the keys (and encoding of the values) of a key-value [`super::CheckpointStore`].
///
/// For each Topic Partition two keys exist:
///
/// * `<namespace>.topic.<topic>.partition.<partition>.state.last_offset`
/// * `<namespace>.topic.<topic>.partition.<partition>.state.counts`
///
/// The `counts` value is a JSON ledger keyed by partition (i.e. `{"3":1200}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointKeys {
    namespace: String,
}

impl CheckpointKeys {
    pub fn new<N: Into<String>>(namespace: N) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    fn state_prefix(&self, tp: &TopicPartition) -> String {
        format!("{}.topic.{}.partition.{}.state", self.namespace, tp.topic, tp.partition)
    }

    pub fn last_offset(&self, tp: &TopicPartition) -> String {
        format!("{}.last_offset", self.state_prefix(tp))
    }

    pub fn counts(&self, tp: &TopicPartition) -> String {
        format!("{}.counts", self.state_prefix(tp))
    }
}

/// Encode `counts` of `tp` as a JSON ledger.
pub(super) fn encode_counts(tp: &TopicPartition, counts: u64) -> String {
    let mut ledger = Map::new();
    ledger.insert(tp.partition.to_string(), Value::from(counts));
    Value::Object(ledger).to_string()
}

/// Decode the `counts` value read at `key`.
///
/// Both the JSON ledger and a bare integer are accepted. If the ledger does not contain
/// an entry for the partition, all the entries are summed up.
pub(super) fn decode_counts(tp: &TopicPartition, key: &str, raw: &str) -> CheckpointStoreResult<u64> {
    let malformed = |reason: String| CheckpointStoreError::Malformed {
        key: key.to_string(),
        reason,
    };

    match serde_json::from_str::<Value>(raw.trim()).map_err(|e| malformed(e.to_string()))? {
        Value::Number(n) => n.as_u64().ok_or_else(|| malformed(format!("'{n}' is not a count"))),
        Value::Object(ledger) => {
            if let Some(v) = ledger.get(&tp.partition.to_string()) {
                return v.as_u64().ok_or_else(|| malformed(format!("'{v}' is not a count")));
            }

            ledger.values().try_fold(0u64, |acc, v| {
                v.as_u64()
                    .map(|c| acc.saturating_add(c))
                    .ok_or_else(|| malformed(format!("'{v}' is not a count")))
            })
        },
        other => Err(malformed(format!("unexpected counts ledger: {other}"))),
    }
}

/// Decode the `last_offset` value read at `key`.
pub(super) fn decode_offset(key: &str, raw: &str) -> CheckpointStoreResult<i64> {
    raw.trim().parse::<i64>().map_err(|e| CheckpointStoreError::Malformed {
        key: key.to_string(),
        reason: format!("unable to parse '{raw}': {e}"),
    })
}
