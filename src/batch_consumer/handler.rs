use std::error::Error;

use async_trait::async_trait;

use crate::kafka_types::Record;

pub type HandlerError = Box<dyn Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

/// The processing routine driven by [`super::BatchConsumer`].
///
/// Records are handed over one at a time, within windows bracketed by [`Self::on_start`]
/// and [`Self::on_end`]: `on_end` is the moment to flush whatever was accumulated, and it
/// is always immediately followed by `on_start`.
///
/// Any error returned stops the consumer, and is returned to its caller.
#[async_trait]
pub trait BatchHandler: Send {
    /// A new window opens.
    async fn on_start(&mut self) -> HandlerResult;

    /// Process a single record.
    async fn on_record(&mut self, record: &Record) -> HandlerResult;

    /// The current window closes.
    async fn on_end(&mut self) -> HandlerResult;
}

/// A [`BatchHandler`] that only logs what it's given.
#[derive(Debug, Default)]
pub struct LoggingHandler {
    windows: u64,
    window_records: u64,
    window_bytes: usize,
}

impl LoggingHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BatchHandler for LoggingHandler {
    async fn on_start(&mut self) -> HandlerResult {
        self.windows += 1;
        self.window_records = 0;
        self.window_bytes = 0;
        debug!("Window #{} opened", self.windows);
        Ok(())
    }

    async fn on_record(&mut self, record: &Record) -> HandlerResult {
        self.window_records += 1;
        self.window_bytes += record.payload_len();
        trace!(
            "{}:{}@{} key='{}' ({} bytes)",
            record.topic,
            record.partition,
            record.offset,
            record.key_str(),
            record.payload_len()
        );
        Ok(())
    }

    async fn on_end(&mut self) -> HandlerResult {
        info!("Window #{} closed: {} records, {} bytes", self.windows, self.window_records, self.window_bytes);
        Ok(())
    }
}
