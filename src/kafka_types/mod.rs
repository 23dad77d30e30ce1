mod record;
mod topic_partition;

pub use record::Record;
pub use topic_partition::TopicPartition;
