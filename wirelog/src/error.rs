use hyper::http;
use std::io;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    #[error("duplicate parameter: {0}")]
    DuplicateParameter(String),

    #[error("missing binding for placeholder {{{0}}}")]
    MissingBinding(String),

    #[error("invalid template {name}: {reason}")]
    InvalidTemplate { name: String, reason: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("SOAP fault: {0}")]
    SoapFault(String),

    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),

    #[error("log delivery failed: {0}")]
    LogDelivery(String),

    #[error("log transaction {0} was already closed")]
    DoubleClose(Uuid),

    #[error("log transaction {0} is closed and can no longer be written")]
    TransactionClosed(Uuid),

    #[error("no log sink is bound under the name {0:?}")]
    SinkNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("test step panicked: {0}")]
    StepPanicked(String),

    #[error("IoError: {0}")]
    Io(#[from] io::Error),

    #[error("Hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("Http error: {0}")]
    Http(#[from] http::Error),

    #[error("Invalid header name")]
    InvalidHeaderName(#[from] hyper::header::InvalidHeaderName),

    #[error("Invalid header value")]
    InvalidHeaderValue(#[from] hyper::header::InvalidHeaderValue),

    #[error("Invalid URI: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::LogDelivery(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}
