use crate::record::TransactionLogRecord;
use serde_json::json;
use std::{
    fmt,
    io::{self, Write},
    sync::{Arc, Mutex},
};
use tracing::warn;

/// Local destination for records the sink could not take.
///
/// Each record is written as a single JSON line carrying the delivery
/// failure next to the record itself.
#[derive(Clone)]
pub struct FallbackLog {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl FallbackLog {
    pub fn stderr() -> Self {
        Self::to_writer(io::stderr())
    }

    pub fn to_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn write(&self, record: &TransactionLogRecord, reason: &str) {
        let line = json!({
            "reason": reason,
            "record": record,
        });

        let written = match self.writer.lock() {
            Ok(mut writer) => writeln!(writer, "{}", line).and_then(|_| writer.flush()),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                "fallback writer lock poisoned",
            )),
        };

        if let Err(e) = written {
            warn!(
                correlation_id = %record.correlation_id(),
                error = %e,
                "record lost, fallback log is not writable"
            );
        }
    }
}

impl Default for FallbackLog {
    fn default() -> Self {
        Self::stderr()
    }
}

impl fmt::Debug for FallbackLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FallbackLog")
    }
}
