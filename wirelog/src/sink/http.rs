use super::LogSink;
use crate::{error::Result, record::TransactionLogRecord};
use reqwest::blocking::Client;
use std::time::Duration;
use tracing::debug;

/// Ships records as JSON to a remote collector.
///
/// Both connecting and the whole request are bounded by `timeout`, so an
/// unreachable collector costs at most that long per record.
#[derive(Debug, Clone)]
pub struct HttpLogSink {
    url: String,
    http: Client,
}

impl HttpLogSink {
    pub fn new<S: Into<String>>(url: S, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            url: url.into(),
            http,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl LogSink for HttpLogSink {
    fn deliver(&self, record: &TransactionLogRecord) -> Result<()> {
        let status = self
            .http
            .post(&self.url)
            .json(record)
            .send()?
            .error_for_status()?
            .status();

        debug!(
            correlation_id = %record.correlation_id(),
            url = %self.url,
            status = status.as_u16(),
            "transaction record delivered"
        );

        Ok(())
    }
}
