pub mod partition_cumulative_count;
pub mod partition_last_offset;
pub mod partition_window_count;

use crate::kafka_types::TopicPartition;
use crate::partition_state::PartitionState;

#[allow(unused)]
pub(self) const TYPE_COUNTER: &str = "counter";
pub(self) const TYPE_GAUGE: &str = "gauge";

pub(self) const HEADER_HELP: &str = "# HELP";
pub(self) const HEADER_TYPE: &str = "# TYPE";

/// Render the bespoke metrics of every given [`PartitionState`], in Prometheus text format.
///
/// These are generated at scrape time from a snapshot of the partition state cache,
/// instead of being kept up to date in the registry: partitions come and go with every
/// rebalance, and this avoids exporting stale series for partitions no longer owned.
pub fn append_partition_states(group: &str, states: &[(TopicPartition, PartitionState)], res: &mut Vec<String>) {
    partition_last_offset::append_headers(res);
    for (tp, s) in states {
        partition_last_offset::append_metric(group, &tp.topic, tp.partition, s.last_offset, res);
    }

    partition_cumulative_count::append_headers(res);
    for (tp, s) in states {
        partition_cumulative_count::append_metric(group, &tp.topic, tp.partition, s.cumulative_count, res);
    }

    partition_window_count::append_headers(res);
    for (tp, s) in states {
        partition_window_count::append_metric(group, &tp.topic, tp.partition, s.window_count, res);
    }
}
