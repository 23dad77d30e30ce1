pub mod bespoke;

use std::collections::HashMap;

use prometheus::{
    register_int_counter_vec_with_registry, register_int_gauge_with_registry, IntCounterVec, IntGauge, Registry,
};

pub const NAMESPACE: &str = "khpt";

pub const LABEL_GROUP: &str = "group";
pub const LABEL_TOPIC: &str = "topic";
pub const LABEL_PARTITION: &str = "partition";
pub const LABEL_TRIGGER: &str = "trigger";
pub const LABEL_KIND: &str = "kind";
pub const LABEL_REASON: &str = "reason";

/// [`LABEL_TRIGGER`] of checkpoint flushes done periodically.
pub const TRIGGER_TICK: &str = "tick";
/// [`LABEL_TRIGGER`] of checkpoint flushes done before losing partitions.
pub const TRIGGER_REVOKE: &str = "revoke";

pub const KIND_ASSIGN: &str = "assign";
pub const KIND_REVOKE: &str = "revoke";

pub const REASON_OFFSET_OUT_OF_RANGE: &str = "offset_out_of_range";
pub const REASON_NO_COMMITTED_OFFSET: &str = "no_committed_offset";

/// Create the Prometheus [`Registry`] for the whole service.
///
/// All metrics get the [`NAMESPACE`] prefix, and the consumer group as default label.
pub fn init(group_id: &str) -> Registry {
    let prom_def_labels = HashMap::from([(LABEL_GROUP.to_string(), group_id.to_string())]);

    info!("Prometheus Metrics default labels:\n{:#?}", prom_def_labels);

    Registry::new_custom(Some(NAMESPACE.to_string()), Some(prom_def_labels))
        .expect("Unable to create a Prometheus Metrics Registry")
}

const MET_RECORDS_NAME: &str = "records_consumed_total";
const MET_RECORDS_HELP: &str = "Records consumed and handed to the ETL callback";
const MET_WINDOWS_NAME: &str = "windows_closed_total";
const MET_WINDOWS_HELP: &str = "Batch windows closed (end hook invoked)";
const MET_FLUSHES_NAME: &str = "checkpoint_flushes_total";
const MET_FLUSHES_HELP: &str = "Partition checkpoints written to the Checkpoint Store";
const MET_FLUSH_FAILURES_NAME: &str = "checkpoint_flush_failures_total";
const MET_FLUSH_FAILURES_HELP: &str = "Partition checkpoints that failed to be written to the Checkpoint Store";
const MET_REBALANCES_NAME: &str = "rebalance_partitions_total";
const MET_REBALANCES_HELP: &str = "Partitions assigned to, or revoked from, this consumer";
const MET_DISCARDS_NAME: &str = "partitions_discarded_total";
const MET_DISCARDS_HELP: &str = "Partitions whose progress was discarded, to be replayed from the earliest offset";
const MET_OWNED_NAME: &str = "owned_partitions";
const MET_OWNED_HELP: &str = "Partitions currently owned by this consumer";

/// Metrics updated by the consumer components while they run.
#[derive(Clone)]
pub struct ConsumerMetrics {
    pub records: IntCounterVec,
    pub windows: IntCounterVec,
    pub flushes: IntCounterVec,
    pub flush_failures: IntCounterVec,
    pub rebalances: IntCounterVec,
    pub discards: IntCounterVec,
    pub owned_partitions: IntGauge,
}

impl ConsumerMetrics {
    /// Create all the consumer metrics, and register them in the given [`Registry`].
    pub fn new(registry: &Registry) -> Self {
        Self {
            records: register_int_counter_vec_with_registry!(
                MET_RECORDS_NAME,
                MET_RECORDS_HELP,
                &[LABEL_TOPIC, LABEL_PARTITION],
                registry
            )
            .unwrap_or_else(|_| panic!("Failed to create metric: {MET_RECORDS_NAME}")),
            windows: register_int_counter_vec_with_registry!(
                MET_WINDOWS_NAME,
                MET_WINDOWS_HELP,
                &[LABEL_TOPIC, LABEL_PARTITION],
                registry
            )
            .unwrap_or_else(|_| panic!("Failed to create metric: {MET_WINDOWS_NAME}")),
            flushes: register_int_counter_vec_with_registry!(
                MET_FLUSHES_NAME,
                MET_FLUSHES_HELP,
                &[LABEL_TRIGGER],
                registry
            )
            .unwrap_or_else(|_| panic!("Failed to create metric: {MET_FLUSHES_NAME}")),
            flush_failures: register_int_counter_vec_with_registry!(
                MET_FLUSH_FAILURES_NAME,
                MET_FLUSH_FAILURES_HELP,
                &[LABEL_TRIGGER],
                registry
            )
            .unwrap_or_else(|_| panic!("Failed to create metric: {MET_FLUSH_FAILURES_NAME}")),
            rebalances: register_int_counter_vec_with_registry!(
                MET_REBALANCES_NAME,
                MET_REBALANCES_HELP,
                &[LABEL_KIND],
                registry
            )
            .unwrap_or_else(|_| panic!("Failed to create metric: {MET_REBALANCES_NAME}")),
            discards: register_int_counter_vec_with_registry!(
                MET_DISCARDS_NAME,
                MET_DISCARDS_HELP,
                &[LABEL_REASON],
                registry
            )
            .unwrap_or_else(|_| panic!("Failed to create metric: {MET_DISCARDS_NAME}")),
            owned_partitions: register_int_gauge_with_registry!(MET_OWNED_NAME, MET_OWNED_HELP, registry)
                .unwrap_or_else(|_| panic!("Failed to create metric: {MET_OWNED_NAME}")),
        }
    }

    /// Metrics registered in a throwaway [`Registry`].
    pub fn unregistered() -> Self {
        Self::new(&Registry::new())
    }
}

#[cfg(test)]
mod test {
    use prometheus::TextEncoder;

    use super::*;

    #[test]
    fn should_export_namespaced_metrics_with_group_label() {
        let registry = init("superhero_sim");
        let metrics = ConsumerMetrics::new(&registry);

        metrics.records.with_label_values(&["lib.server.game", "0"]).inc_by(3);
        metrics.flushes.with_label_values(&[TRIGGER_TICK]).inc();

        let mut body = String::new();
        TextEncoder.encode_utf8(&registry.gather(), &mut body).unwrap();

        assert!(body.contains(
            "khpt_records_consumed_total{group=\"superhero_sim\",partition=\"0\",topic=\"lib.server.game\"} 3"
        ));
        assert!(body.contains("khpt_checkpoint_flushes_total{group=\"superhero_sim\",trigger=\"tick\"} 1"));
    }
}
