#[macro_use]
extern crate log;

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use kheckpoint::batch_consumer::{BatchConsumer, ConsumerError, LoggingHandler, RunStats};
use kheckpoint::broker::{BrokerError, KafkaBroker};
use kheckpoint::checkpoint_store::{self, CheckpointStoreError};
use kheckpoint::cli::Cli;
use kheckpoint::internals::BackoffError;
use kheckpoint::partition_state::SharedPartitionStateCache;
use kheckpoint::prometheus_metrics::{self, ConsumerMetrics};
use kheckpoint::{http, logging};

#[derive(Error, Debug)]
enum AppError {
    #[error("Checkpoint Store: {0}")]
    Store(#[from] CheckpointStoreError),

    #[error("Kafka: {0}")]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Consumer(#[from] ConsumerError),
}

impl AppError {
    fn exit_code(&self) -> i32 {
        match self {
            // Shutdown was requested while still connecting
            AppError::Store(CheckpointStoreError::Connect(BackoffError::Cancelled(_)))
            | AppError::Broker(BrokerError::Connect(BackoffError::Cancelled(_))) => exit_code::SUCCESS,
            AppError::Store(CheckpointStoreError::UnsupportedLocation(_)) => exit_code::CONFIG_ERROR,
            AppError::Consumer(ConsumerError::Handler(_)) => exit_code::SOFTWARE_ERROR,
            _ => exit_code::SERVICE_UNAVAILABLE,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = parse_cli_and_init_logging();

    let shutdown_token = build_shutdown_token();

    let code = match run(&cli, &shutdown_token).await {
        Ok(stats) => {
            info!("Done: {} polls, {} records, {} windows", stats.polls, stats.records, stats.windows);
            exit_code::SUCCESS
        },
        Err(e) => {
            let code = e.exit_code();
            if code == exit_code::SUCCESS {
                warn!("{e}");
            } else {
                error!("{e}");
            }
            code
        },
    };

    std::process::exit(code);
}

async fn run(cli: &Cli, shutdown_token: &CancellationToken) -> Result<RunStats, AppError> {
    let registry = Arc::new(prometheus_metrics::init(&cli.group_id));
    let metrics = ConsumerMetrics::new(&registry);
    let cache = SharedPartitionStateCache::new();

    let store = checkpoint_store::connect(
        &cli.checkpoint_store,
        &cli.checkpoint_namespace,
        cli.connect_backoff(),
        shutdown_token,
    )
    .await?;
    let broker = KafkaBroker::connect(&cli.build_client_config(), cli.broker_settings(), shutdown_token).await?;

    // HTTP service outlives the consumer only until it stops
    let http_token = shutdown_token.child_token();
    let http_handle = {
        let listen_on = cli.listen_on();
        let group_id = cli.group_id.clone();
        let cache = cache.clone();
        let registry = registry.clone();
        let token = http_token.clone();
        tokio::spawn(async move { http::init(listen_on, &group_id, cache, registry, token).await })
    };

    let mut consumer =
        BatchConsumer::new(Arc::new(broker), LoggingHandler::new(), store, cache, cli.consumer_config(), metrics);
    let res = consumer.run(shutdown_token).await;

    http_token.cancel();
    match http_handle.await {
        Ok(Ok(())) => {},
        Ok(Err(e)) => error!("HTTP service failed: {e}"),
        Err(e) => error!("HTTP service terminated abnormally: {e}"),
    }

    Ok(res?)
}

fn parse_cli_and_init_logging() -> Cli {
    // Parse command line input and initialize logging
    let cli = Cli::parse_and_validate();
    logging::init(cli.verbosity_level());

    trace!("Created:\n{:#?}", cli);

    cli
}

fn build_shutdown_token() -> CancellationToken {
    let shutdown_token = CancellationToken::new();

    // Setup shutdown signal handler:
    // when it's time to shutdown, cancel the token shared by all the tasks.
    //
    // NOTE: This handler will be listening on its own dedicated thread.
    let signal_token = shutdown_token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Shutting down...");
        signal_token.cancel();
    }) {
        error!("Failed to register signal handler: {e}");
    }

    shutdown_token
}
