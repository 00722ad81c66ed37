mod configuration;
mod data;
mod driver;
mod error;
mod fallback;
mod filters;
mod handler;
mod record;
mod template;
mod transaction;
mod transport;
mod util;

pub mod sink;
pub mod soap;
pub mod xml;

pub use configuration::{HarnessConfiguration, HarnessSettings, SinkSettings, DEFAULT_SINK_NAME};
pub use data::{RequestData, ResponseData};
pub use driver::{
    labels, ParameterValue, Parameters, StepReport, StepResult, TemplateTestCase, TestCase,
    TestCaseDriver,
};
pub use error::{Error, Result};
pub use fallback::FallbackLog;
pub use filters::{BodyFilter, Direction, HeadersFilter, LogFilter, LogFiltersBuilder, MASK};
pub use handler::{HandlerChain, MessageHandler, TransactionLogHandler};
pub use record::{HttpMetadata, RecordDraft, SoapMetadata, TransactionLogRecord};
pub use template::{RequestTemplate, TemplateSet};
pub use transaction::{CloseOutcome, LogTransaction, LogTransactionManager, DEFAULT_SINK_TIMEOUT};
pub use transport::{HyperTransport, ServiceClient, ServicePort, SoapTransport};
pub use wirelog_codegen::wirelog_test_case;
