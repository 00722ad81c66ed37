//! Harness configuration.
//!
//! [`HarnessSettings`] is the serializable part, usually read from a YAML file
//! once at startup. [`HarnessConfiguration`] adds the live collaborators
//! (sink, transport, handlers) and is what a driver is built from.

use crate::{
    error::{Error, Result},
    fallback::FallbackLog,
    filters::{Direction, LogFilter, LogFiltersBuilder},
    handler::{HandlerChain, MessageHandler, TransactionLogHandler},
    sink::{SharedSink, SinkRegistry},
    soap::SoapVersion,
    template::TemplateSet,
    transport::{HyperTransport, SoapTransport},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path, path::PathBuf, sync::Arc, time::Duration};
use tracing::info;

pub const DEFAULT_SINK_NAME: &str = "default";

/// File-backed settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessSettings {
    /// Upper bound for handing one record to the log sink
    pub sink_timeout_ms: u64,

    /// Upper bound for one SOAP call, connect included
    pub call_timeout_ms: u64,

    pub soap_version: SoapVersion,

    /// Name of the sink (in `sinks`) closed records go to
    pub log_sink: String,

    pub sinks: BTreeMap<String, SinkSettings>,

    /// Directory of `*.xml` request templates, if templates are file based
    pub templates_dir: Option<PathBuf>,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        let mut sinks = BTreeMap::new();
        sinks.insert(String::from(DEFAULT_SINK_NAME), SinkSettings::Memory);

        Self {
            sink_timeout_ms: 5_000,
            call_timeout_ms: 30_000,
            soap_version: SoapVersion::default(),
            log_sink: String::from(DEFAULT_SINK_NAME),
            sinks,
            templates_dir: None,
        }
    }
}

impl HarnessSettings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let settings = Self::from_yaml_str(&content)?;

        info!(
            path = %path.as_ref().display(),
            log_sink = %settings.log_sink,
            sink_timeout_ms = settings.sink_timeout_ms,
            "harness settings loaded"
        );

        Ok(settings)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.sink_timeout_ms == 0 {
            return Err(Error::Config(String::from(
                "sink_timeout_ms must be greater than zero",
            )));
        }
        if self.call_timeout_ms == 0 {
            return Err(Error::Config(String::from(
                "call_timeout_ms must be greater than zero",
            )));
        }
        if !self.sinks.contains_key(&self.log_sink) {
            return Err(Error::Config(format!(
                "log_sink {:?} is not declared under sinks",
                self.log_sink
            )));
        }

        Ok(())
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Loads the templates under `templates_dir`, or an empty set.
    pub fn load_templates(&self) -> Result<TemplateSet> {
        match &self.templates_dir {
            Some(directory) => TemplateSet::load_dir(directory),
            None => Ok(TemplateSet::default()),
        }
    }
}

/// Where a named sink delivers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkSettings {
    Memory,
    Http { url: String },
    Markdown { directory: PathBuf },
}

#[derive(Debug)]
pub struct HarnessConfiguration {
    settings: HarnessSettings,
    sink: SharedSink,
    transport: Option<Arc<dyn SoapTransport + Send + Sync>>,
    handlers: Vec<Arc<dyn MessageHandler + Send + Sync>>,
    log_filters: Vec<Arc<LogFilter>>,
    fallback_log: FallbackLog,
}

impl HarnessConfiguration {
    pub fn new(sink: SharedSink) -> Self {
        Self {
            settings: HarnessSettings::default(),
            sink,
            transport: None,
            handlers: Vec::new(),
            log_filters: Vec::new(),
            fallback_log: FallbackLog::default(),
        }
    }

    /// Resolves the configured `log_sink` through a registry built from the
    /// declared sinks.
    pub fn from_settings(settings: HarnessSettings) -> Result<Self> {
        let registry = SinkRegistry::from_settings(&settings)?;
        Self::from_registry(settings, &registry)
    }

    pub fn from_registry(settings: HarnessSettings, registry: &SinkRegistry) -> Result<Self> {
        let sink = registry.lookup(&settings.log_sink)?;
        let mut configuration = Self::new(sink);
        configuration.settings = settings;

        Ok(configuration)
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    pub fn set_sink_timeout(&mut self, timeout: Duration) {
        self.settings.sink_timeout_ms = timeout.as_millis() as u64;
    }

    pub fn set_call_timeout(&mut self, timeout: Duration) {
        self.settings.call_timeout_ms = timeout.as_millis() as u64;
    }

    pub fn set_soap_version(&mut self, version: SoapVersion) {
        self.settings.soap_version = version;
    }

    pub fn soap_version(&self) -> SoapVersion {
        self.settings.soap_version
    }

    pub fn sink(&self) -> SharedSink {
        self.sink.clone()
    }

    pub fn set_sink(&mut self, sink: SharedSink) {
        self.sink = sink;
    }

    pub fn transport(&self) -> Arc<dyn SoapTransport + Send + Sync> {
        self.transport
            .clone()
            .unwrap_or_else(|| Arc::new(HyperTransport::new(self.settings.call_timeout())))
    }

    pub fn set_transport(&mut self, transport: Arc<dyn SoapTransport + Send + Sync>) {
        self.transport = Some(transport);
    }

    /// Adds a handler that runs after the built-in transaction log handler
    /// on send.
    pub fn add_handler(&mut self, handler: Arc<dyn MessageHandler + Send + Sync>) {
        self.handlers.push(handler);
    }

    pub fn add_request_filters<F: FnOnce(&mut LogFiltersBuilder) -> &mut LogFiltersBuilder>(
        &mut self,
        func: F,
    ) {
        self.add_filters(Direction::Request, func);
    }

    pub fn add_response_filters<F: FnOnce(&mut LogFiltersBuilder) -> &mut LogFiltersBuilder>(
        &mut self,
        func: F,
    ) {
        self.add_filters(Direction::Response, func);
    }

    fn add_filters<F: FnOnce(&mut LogFiltersBuilder) -> &mut LogFiltersBuilder>(
        &mut self,
        direction: Direction,
        func: F,
    ) {
        let mut filters = LogFiltersBuilder::new(direction);
        let _ = func(&mut filters);
        self.log_filters
            .extend(filters.build().into_iter().map(Arc::new));
    }

    pub fn log_filters(&self) -> &[Arc<LogFilter>] {
        &self.log_filters
    }

    pub fn fallback_log(&self) -> FallbackLog {
        self.fallback_log.clone()
    }

    pub fn set_fallback_log(&mut self, fallback_log: FallbackLog) {
        self.fallback_log = fallback_log;
    }

    /// The transaction log handler followed by every added handler.
    pub fn handler_chain(&self) -> HandlerChain {
        let mut chain = HandlerChain::new();
        chain.push(Arc::new(TransactionLogHandler::with_filters(
            self.log_filters.clone(),
        )));
        for handler in &self.handlers {
            chain.push(handler.clone());
        }
        chain
    }
}
