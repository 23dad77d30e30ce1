use std::net::{IpAddr, SocketAddr};

use clap::{ArgGroup, Parser};
use rdkafka::ClientConfig;
use tokio::time::Duration;

use crate::batch_consumer::ConsumerConfig;
use crate::broker::KafkaBrokerSettings;
use crate::constants::{
    DEFAULT_BATCH_RUNS, DEFAULT_BATCH_SIZE, DEFAULT_BOOTSTRAP_BROKERS, DEFAULT_CHECKPOINT_INTERVAL_MS,
    DEFAULT_CHECKPOINT_NAMESPACE, DEFAULT_CHECKPOINT_STORE, DEFAULT_CONNECT_BACKOFF_MS, DEFAULT_GROUP_ID,
    DEFAULT_HTTP_HOST, DEFAULT_HTTP_PORT, DEFAULT_MAX_POLL_RECORDS, DEFAULT_PARTITION_PAUSE_MS,
    DEFAULT_POLL_TIMEOUT_MS, DEFAULT_TOPIC,
};

/// Timeout of requests to the Kafka cluster made outside of polling.
const KAFKA_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Command Line Interface, defined via the declarative,
/// `derive` based functionality of the `clap` crate.
///
/// Every option can also be set via environment variable.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("logging_flags")
        .required(false)
        .multiple(false)
        .args(["verbose", "quiet"]),
))]
pub struct Cli {
    // ------------------------------------------------------------------ Consumer Client configuration
    /// Initial Kafka Brokers to connect to (format: 'HOST:PORT,...').
    ///
    /// Equivalent to '--kafka-conf=bootstrap.servers:host:port,...'.
    #[arg(
        short,
        long = "brokers",
        value_name = "BOOTSTRAP_BROKERS",
        env = "KAFKA_BROKERS",
        default_value = DEFAULT_BOOTSTRAP_BROKERS
    )]
    pub bootstrap_brokers: String,

    /// Consumer Group to join.
    ///
    /// Equivalent to '--kafka-conf=group.id:my-group'.
    #[arg(short, long = "group", value_name = "GROUP_ID", env = "KAFKA_GROUP_ID", default_value = DEFAULT_GROUP_ID)]
    pub group_id: String,

    /// Topics to consume (format: 'TOPIC,...').
    #[arg(
        short,
        long = "topic",
        value_name = "TOPIC",
        env = "WORKER_CHANNEL",
        default_value = DEFAULT_TOPIC,
        value_delimiter = ','
    )]
    pub topics: Vec<String>,

    /// Client identifier used by the internal Kafka (Consumer) Client.
    ///
    /// Equivalent to '--kafka-conf=client.id:my-client-id'.
    #[arg(long = "client-id", value_name = "CLIENT_ID", default_value = env!("CARGO_PKG_NAME"))]
    pub client_id: String,

    /// Additional configuration used by the internal Kafka (Consumer) Client (format: 'CONF_KEY:CONF_VAL').
    ///
    /// To set multiple configurations keys, use this argument multiple times.
    /// See: https://github.com/edenhill/librdkafka/blob/master/CONFIGURATION.md.
    #[arg(
        long = "kafka-conf",
        value_name = "CONF_KEY:CONF_VAL",
        value_parser = kv_clap_value_parser,
        verbatim_doc_comment
    )]
    pub kafka_config: Vec<KVPair>,

    /// Upper bound of records returned by a single poll.
    #[arg(
        long = "max-poll-records",
        value_name = "COUNT",
        env = "MAX_POLL_RECORDS",
        default_value = DEFAULT_MAX_POLL_RECORDS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub max_poll_records: u64,

    /// Delay (ms) between attempts to reach Kafka and the Checkpoint Store at startup.
    #[arg(
        long = "connect-backoff-ms",
        value_name = "MILLISECONDS",
        env = "CONNECT_BACKOFF_MS",
        default_value = DEFAULT_CONNECT_BACKOFF_MS
    )]
    pub connect_backoff_ms: u64,

    // ------------------------------------------------------------------ Batching
    /// Keep consuming, closing each partition window only once it exceeds '--batch-size'.
    ///
    /// When 'false', every poll iteration closes the window of each partition it consumed from,
    /// and a single iteration is run (unless '--batch-runs' says otherwise).
    #[arg(
        long,
        value_name = "BOOL",
        env = "BATCH_CONTINUOUS",
        default_value_t = true,
        action = clap::ArgAction::Set,
        verbatim_doc_comment
    )]
    pub continuous: bool,

    /// Records a partition window has to exceed before it closes.
    #[arg(long = "batch-size", value_name = "RECORDS", env = "BATCH_SIZE", default_value = DEFAULT_BATCH_SIZE)]
    pub batch_size: u64,

    /// Poll iterations to run before exiting: '0' means "no limit".
    ///
    /// Applies in continuous mode too: a non-zero value stops a '--continuous true' consumer
    /// after that many iterations.
    #[arg(long = "batch-runs", value_name = "ITERATIONS", env = "BATCH_RUNS", default_value = DEFAULT_BATCH_RUNS)]
    pub batch_runs: u64,

    /// How long (ms) a single poll waits for records.
    #[arg(
        long = "poll-timeout-ms",
        value_name = "MILLISECONDS",
        env = "POLL_TIMEOUT_MS",
        default_value = DEFAULT_POLL_TIMEOUT_MS
    )]
    pub poll_timeout_ms: u64,

    /// Pause (ms) after dispatching the records of each partition.
    #[arg(
        long = "partition-pause-ms",
        value_name = "MILLISECONDS",
        env = "PARTITION_PAUSE_MS",
        default_value = DEFAULT_PARTITION_PAUSE_MS
    )]
    pub partition_pause_ms: u64,

    // ------------------------------------------------------------------ Checkpointing
    /// Where partition checkpoints are kept (format: 'redis://HOST:PORT/DB' or 'memory://').
    ///
    /// 'memory://' checkpoints do not survive a restart.
    #[arg(
        long = "checkpoint-store",
        value_name = "URL",
        env = "CHECKPOINT_STORE",
        default_value = DEFAULT_CHECKPOINT_STORE,
        verbatim_doc_comment
    )]
    pub checkpoint_store: String,

    /// Prefix of every key written to the Checkpoint Store.
    #[arg(
        long = "checkpoint-namespace",
        value_name = "NAMESPACE",
        env = "CHECKPOINT_NAMESPACE",
        default_value = DEFAULT_CHECKPOINT_NAMESPACE
    )]
    pub checkpoint_namespace: String,

    /// Interval (ms) between periodic checkpoints of every owned partition.
    #[arg(
        long = "checkpoint-interval-ms",
        value_name = "MILLISECONDS",
        env = "CHECKPOINT_INTERVAL_MS",
        default_value = DEFAULT_CHECKPOINT_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub checkpoint_interval_ms: u64,

    // ------------------------------------------------------------------ HTTP
    /// Host address to listen on for HTTP requests.
    ///
    /// Supports both IPv4 and IPv6 addresses.
    #[arg(long, default_value = DEFAULT_HTTP_HOST, verbatim_doc_comment)]
    pub host: IpAddr,

    /// Port to listen on for HTTP requests.
    #[arg(long, default_value = DEFAULT_HTTP_PORT, verbatim_doc_comment)]
    pub port: u16,

    // ------------------------------------------------------------------ Logging
    /// Verbose logging.
    ///
    /// * none    = 'WARN'
    /// * '-v'    = 'INFO'
    /// * '-vv'   = 'DEBUG'
    /// * '-vvv'  = 'TRACE'
    ///
    /// Alternatively, set environment variable 'KHECKPOINT_LOG=(ERROR|WARN|INFO|DEBUG|TRACE|OFF)'.
    #[arg(short, long, action = clap::ArgAction::Count, verbatim_doc_comment)]
    pub verbose: u8,

    /// Quiet logging.
    ///
    /// * none    = 'WARN'
    /// * '-q'    = 'ERROR'
    /// * '-qq'   = 'OFF'
    ///
    /// Alternatively, set environment variable 'KHECKPOINT_LOG=(ERROR|WARN|INFO|DEBUG|TRACE|OFF)'.
    #[arg(short, long, action = clap::ArgAction::Count, verbatim_doc_comment)]
    pub quiet: u8,
}

impl Cli {
    pub fn parse_and_validate() -> Self {
        Self::parse()
    }

    pub fn verbosity_level(&self) -> i8 {
        self.verbose as i8 - self.quiet as i8
    }

    pub fn listen_on(&self) -> SocketAddr {
        SocketAddr::from((self.host, self.port))
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            topics: self.topics.clone(),
            continuous: self.continuous,
            batch_size: self.batch_size,
            run_budget: self.batch_runs,
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            partition_pause: Duration::from_millis(self.partition_pause_ms),
            checkpoint_interval: Duration::from_millis(self.checkpoint_interval_ms),
        }
    }

    pub fn broker_settings(&self) -> KafkaBrokerSettings {
        KafkaBrokerSettings {
            max_poll_records: self.max_poll_records as usize,
            request_timeout: KAFKA_REQUEST_TIMEOUT,
            connect_backoff: self.connect_backoff(),
        }
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }

    /// Kafka client configuration.
    ///
    /// Progress lives in the Checkpoint Store, not in Kafka: offsets are never committed,
    /// and invalid positions are reported as errors instead of being reset.
    /// These can't be overridden via `--kafka-conf`.
    pub fn build_client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.bootstrap_brokers.clone())
            .set("group.id", self.group_id.clone())
            .set("client.id", self.client_id.clone());
        for cfg in &self.kafka_config {
            config.set(cfg.0.clone(), cfg.1.clone());
        }
        config.set("enable.auto.commit", "false").set("auto.offset.reset", "error");

        trace!("Created:\n{:#?}", config);
        config
    }
}

/// A simple (key,value) pair of `String`s, useful to be parsed from arguments via [`kv_clap_value_parser`].
pub type KVPair = (String, String);

/// To be used as [`clap::value_parser`] function to create [`KVPair`] values.
fn kv_clap_value_parser(kv: &str) -> Result<KVPair, String> {
    match kv.split_once(':') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err("Should have 'K:V' format".to_string()),
    }
}
