// Inner modules
mod config;
mod consumer;
mod handler;

// Exports
pub use config::ConsumerConfig;
pub use consumer::{BatchConsumer, ConsumerError, RunStats};
pub use handler::{BatchHandler, HandlerError, HandlerResult, LoggingHandler};
