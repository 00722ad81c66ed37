//! Destinations for closed transaction log records.

mod http;
mod markdown;
mod registry;

pub use self::http::HttpLogSink;
pub use self::markdown::{load_markdown, save_record, MarkdownLogSink, MarkdownTransaction};
pub use self::registry::SinkRegistry;

use crate::{
    configuration::SinkSettings,
    error::{Error, Result},
    record::TransactionLogRecord,
};
use std::{
    fmt::Debug,
    sync::{Arc, Mutex},
    time::Duration,
};

/// Accepts one closed record. Delivery is all-or-nothing: either the sink
/// has the whole record when this returns `Ok`, or it has nothing.
///
/// Calls come from a single delivery worker per transaction manager, one
/// record at a time. A call that never returns stalls that worker: later
/// records wait in a bounded queue and fail after the sink timeout.
pub trait LogSink: Debug {
    fn deliver(&self, record: &TransactionLogRecord) -> Result<()>;
}

pub type SharedSink = Arc<dyn LogSink + Send + Sync>;

/// Builds the sink described by `settings`.
pub fn connect(settings: &SinkSettings, timeout: Duration) -> Result<SharedSink> {
    Ok(match settings {
        SinkSettings::Memory => Arc::new(MemoryLogSink::new()),
        SinkSettings::Http { url } => Arc::new(HttpLogSink::new(url.as_str(), timeout)?),
        SinkSettings::Markdown { directory } => Arc::new(MarkdownLogSink::new(directory)?),
    })
}

/// In-process sink keeping every record it receives.
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    records: Mutex<Vec<TransactionLogRecord>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<TransactionLogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for MemoryLogSink {
    fn deliver(&self, record: &TransactionLogRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| Error::LogDelivery(String::from("The lock was poisoned")))?
            .push(record.clone());

        Ok(())
    }
}
