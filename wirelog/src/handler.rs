//! Wire-boundary hooks.
//!
//! The port calls every registered [`MessageHandler`] right before a request
//! is sent and right after a response arrives. Handlers write into the draft
//! of the open log transaction; they cannot fail the call.

use crate::{
    data::{RequestData, ResponseData},
    filters::{Direction, LogFilter},
    record::RecordDraft,
    soap, util,
};
use std::{
    fmt::Debug,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tracing::warn;

pub trait MessageHandler: Debug {
    fn on_send(&self, request: &RequestData, record: &mut RecordDraft);
    fn on_receive(&self, response: &ResponseData, record: &mut RecordDraft);
}

/// Captures the HTTP and SOAP metadata of an exchange into the record.
#[derive(Debug, Default)]
pub struct TransactionLogHandler {
    filters: Vec<Arc<LogFilter>>,
}

impl TransactionLogHandler {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    pub fn with_filters(filters: Vec<Arc<LogFilter>>) -> Self {
        Self { filters }
    }

    fn apply_filters(&self, direction: Direction, record: &mut RecordDraft) {
        self.filters
            .iter()
            .filter(|f| f.direction() == direction)
            .for_each(|f| f.apply(record));
    }

    fn soap_action(request: &RequestData) -> Option<String> {
        request
            .soap_action
            .clone()
            .or_else(|| {
                util::header(&request.headers, "SOAPAction")
                    .map(|value| soap::parse_soap_action(value))
                    .filter(|action| !action.is_empty())
            })
            .or_else(|| {
                util::header(&request.headers, "Content-Type")
                    .and_then(|value| soap::action_from_content_type(value))
            })
            .or_else(|| soap::extract_addressing(&request.body).action)
    }
}

impl MessageHandler for TransactionLogHandler {
    fn on_send(&self, request: &RequestData, record: &mut RecordDraft) {
        let (path, query) = util::split_endpoint(&request.endpoint);

        record.http.method = Some(request.method.clone());
        record.http.path = Some(path);
        record.http.query = query;
        record.http.request_headers = request
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        record.soap.action = Self::soap_action(request);
        record.soap.endpoint = Some(request.endpoint.clone());
        record.soap.message_id = request
            .message_id
            .clone()
            .or_else(|| soap::extract_addressing(&request.body).message_id);
        record.soap.service_name = request.service_name.clone();
        record.request_body = Some(request.body.clone());

        self.apply_filters(Direction::Request, record);
    }

    fn on_receive(&self, response: &ResponseData, record: &mut RecordDraft) {
        record.http.response_code = Some(response.status_code);
        record.http.response_headers = response
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        record.response_body = Some(response.body.clone());

        self.apply_filters(Direction::Response, record);
    }
}

/// Ordered set of handlers attached to an outbound binding.
///
/// Send hooks run in registration order, receive hooks in reverse.
#[derive(Debug, Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn MessageHandler + Send + Sync>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn push(&mut self, handler: Arc<dyn MessageHandler + Send + Sync>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn on_send(&self, request: &RequestData, record: &mut RecordDraft) {
        for handler in &self.handlers {
            Self::guarded(handler.as_ref(), "on_send", record, |h, r| h.on_send(request, r));
        }
    }

    pub fn on_receive(&self, response: &ResponseData, record: &mut RecordDraft) {
        for handler in self.handlers.iter().rev() {
            Self::guarded(handler.as_ref(), "on_receive", record, |h, r| {
                h.on_receive(response, r)
            });
        }
    }

    // A misbehaving handler must not take the network call down with it.
    fn guarded<F>(
        handler: &(dyn MessageHandler + Send + Sync),
        hook: &str,
        record: &mut RecordDraft,
        f: F,
    ) where
        F: FnOnce(&(dyn MessageHandler + Send + Sync), &mut RecordDraft),
    {
        let correlation_id = record.correlation_id();
        if panic::catch_unwind(AssertUnwindSafe(|| f(handler, record))).is_err() {
            warn!(
                %correlation_id,
                handler = ?handler,
                hook,
                "message handler panicked, continuing without it"
            );
        }
    }
}
