#[macro_use]
extern crate log;

pub mod batch_consumer;
pub mod broker;
pub mod checkpoint_store;
pub mod checkpoint_ticker;
#[cfg(unix)]
pub mod cli;
pub mod constants;
pub mod http;
pub mod internals;
pub mod kafka_types;
pub mod logging;
pub mod partition_state;
pub mod prometheus_metrics;
pub mod rebalance;
