use const_format::concatcp;

/// Default Kafka host, used when `--brokers` is not provided.
pub(crate) const DEFAULT_KAFKA_HOST: &str = "localhost";

/// Default Kafka port, used when `--brokers` is not provided.
pub(crate) const DEFAULT_KAFKA_PORT: u16 = 9093;

/// Default bootstrap brokers: `DEFAULT_KAFKA_HOST:DEFAULT_KAFKA_PORT`.
pub(crate) const DEFAULT_BOOTSTRAP_BROKERS: &str =
    concatcp!(DEFAULT_KAFKA_HOST, ":", DEFAULT_KAFKA_PORT);

/// Consumer Group (`group.id`) joined by default.
pub(crate) const DEFAULT_GROUP_ID: &str = "superhero_sim";

/// Topic consumed by default.
pub(crate) const DEFAULT_TOPIC: &str = "lib.server.game";

/// Amount of messages a partition window can hold, before it gets closed.
pub(crate) const DEFAULT_BATCH_SIZE: &str = "1000";

/// Amount of poll iterations to run: `0` means "no limit".
pub(crate) const DEFAULT_BATCH_RUNS: &str = "0";

pub(crate) const DEFAULT_POLL_TIMEOUT_MS: &str = "1000";
pub(crate) const DEFAULT_PARTITION_PAUSE_MS: &str = "1000";
pub(crate) const DEFAULT_CHECKPOINT_INTERVAL_MS: &str = "1000";
pub(crate) const DEFAULT_CONNECT_BACKOFF_MS: &str = "1000";
pub(crate) const DEFAULT_MAX_POLL_RECORDS: &str = "500";

/// Default Redis host of the Checkpoint Store.
pub(crate) const DEFAULT_REDIS_HOST: &str = "localhost";

/// Default Redis port of the Checkpoint Store.
pub(crate) const DEFAULT_REDIS_PORT: u16 = 6379;

/// Default Checkpoint Store location.
pub(crate) const DEFAULT_CHECKPOINT_STORE: &str =
    concatcp!("redis://", DEFAULT_REDIS_HOST, ":", DEFAULT_REDIS_PORT, "/0");

/// Prefix of every key written to the Checkpoint Store.
pub const DEFAULT_CHECKPOINT_NAMESPACE: &str = "kafka";

pub(crate) const DEFAULT_HTTP_HOST: &str = "0.0.0.0";
pub(crate) const DEFAULT_HTTP_PORT: &str = "6565";

/// Environment variable that overrides the logging verbosity set via command line.
pub(crate) const LOG_ENV_VAR: &str = "KHECKPOINT_LOG";
