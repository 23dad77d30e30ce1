use std::fmt;

#[cfg(unix)]
use rdkafka::topic_partition_list::TopicPartitionListElem;

/// Represents a single Topic-Partition pair.
///
/// This is the identity of every piece of per-partition state: cache entries,
/// checkpoint records and broker positions are all keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: u32,
}

impl TopicPartition {
    pub fn new<T: Into<String>>(topic: T, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition)
    }
}

#[cfg(unix)]
impl From<&TopicPartitionListElem<'_>> for TopicPartition {
    fn from(elem: &TopicPartitionListElem<'_>) -> Self {
        TopicPartition::new(elem.topic(), elem.partition() as u32)
    }
}
