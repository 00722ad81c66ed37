//! Transaction log records.
//!
//! A [`RecordDraft`] is the writable form owned by an open log transaction.
//! Closing the transaction freezes it into a [`TransactionLogRecord`], which
//! only exposes getters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, mem};
use uuid::Uuid;

/// HTTP metadata captured for one exchange. Request-side fields come from
/// `on_send`, response-side fields from `on_receive`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMetadata {
    pub method: Option<String>,
    pub path: Option<String>,
    pub query: Option<String>,
    pub request_headers: BTreeMap<String, String>,
    pub response_code: Option<u16>,
    pub response_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoapMetadata {
    pub action: Option<String>,
    pub endpoint: Option<String>,
    pub message_id: Option<String>,
    pub service_name: Option<String>,
}

/// Writable record of an in-flight exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDraft {
    pub(crate) correlation_id: Uuid,
    pub(crate) test_step: String,
    pub(crate) test_case: Option<String>,
    pub(crate) opened_at: DateTime<Utc>,
    pub http: HttpMetadata,
    pub soap: SoapMetadata,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub error: Option<String>,
}

impl RecordDraft {
    pub(crate) fn new<S: Into<String>>(test_step: S, test_case: Option<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            test_step: test_step.into(),
            test_case,
            opened_at: Utc::now(),
            http: HttpMetadata::default(),
            soap: SoapMetadata::default(),
            request_body: None,
            response_body: None,
            error: None,
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn test_step(&self) -> &str {
        &self.test_step
    }

    /// Records an error. Later errors are appended so none is lost.
    pub fn set_error<S: AsRef<str>>(&mut self, error: S) {
        match &mut self.error {
            Some(existing) => {
                existing.push_str("; ");
                existing.push_str(error.as_ref());
            }
            None => self.error = Some(error.as_ref().to_string()),
        }
    }

    /// Moves the captured data into an immutable record, leaving the draft
    /// empty.
    pub(crate) fn freeze(&mut self) -> TransactionLogRecord {
        TransactionLogRecord {
            correlation_id: self.correlation_id,
            test_step: mem::take(&mut self.test_step),
            test_case: self.test_case.take(),
            opened_at: self.opened_at,
            closed_at: Utc::now(),
            http: mem::take(&mut self.http),
            soap: mem::take(&mut self.soap),
            request_body: self.request_body.take(),
            response_body: self.response_body.take(),
            error: self.error.take(),
        }
    }
}

/// Immutable snapshot of one request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLogRecord {
    correlation_id: Uuid,
    test_step: String,
    test_case: Option<String>,
    opened_at: DateTime<Utc>,
    closed_at: DateTime<Utc>,
    http: HttpMetadata,
    soap: SoapMetadata,
    request_body: Option<String>,
    response_body: Option<String>,
    error: Option<String>,
}

impl TransactionLogRecord {
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn test_step(&self) -> &str {
        &self.test_step
    }

    pub fn test_case(&self) -> Option<&str> {
        self.test_case.as_deref()
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn closed_at(&self) -> DateTime<Utc> {
        self.closed_at
    }

    pub fn http(&self) -> &HttpMetadata {
        &self.http
    }

    pub fn soap(&self) -> &SoapMetadata {
        &self.soap
    }

    pub fn request_body(&self) -> Option<&str> {
        self.request_body.as_deref()
    }

    pub fn response_body(&self) -> Option<&str> {
        self.response_body.as_deref()
    }

    pub fn response_code(&self) -> Option<u16> {
        self.http.response_code
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether the exchange got as far as a response.
    pub fn has_response(&self) -> bool {
        self.http.response_code.is_some()
    }
}
