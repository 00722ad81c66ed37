//! Test case driver.
//!
//! [`TestCaseDriver::run_test`] is the entry point of one test step: it takes
//! labelled parameters, builds the request from the test case's template,
//! calls the service through a logged port and reports the outcome as
//! labelled values. Failures never escape as errors or panics; they become a
//! single `error` entry.

use crate::{
    configuration::HarnessConfiguration,
    error::{Error, Result},
    record::{RecordDraft, TransactionLogRecord},
    soap,
    template::{RequestTemplate, TemplateSet},
    transaction::LogTransactionManager,
    transport::ServiceClient,
};
use std::{
    any::Any,
    collections::HashMap,
    fmt,
    iter::FromIterator,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex},
    thread,
};
use tokio::runtime::{Handle, Runtime};
use tracing::{info, info_span, warn};

/// Well-known parameter and result labels.
pub mod labels {
    pub const URL: &str = "url";
    pub const TEST_STEP: &str = "testStep";
    pub const ERROR: &str = "error";
}

/// One generated test case: a template and the parameters feeding it.
pub trait TestCase {
    fn name(&self) -> &str;

    fn template(&self) -> &RequestTemplate;

    fn soap_action(&self) -> &str;

    fn service_name(&self) -> Option<&str> {
        None
    }

    /// `(placeholder, parameter label)` pairs.
    fn bindings(&self) -> Vec<(&str, &str)>;

    /// Placeholders whose values are XML fragments, inserted unescaped.
    fn raw_placeholders(&self) -> Vec<&str> {
        Vec::new()
    }

    fn required_parameters(&self) -> Vec<&str> {
        let mut required = vec![labels::URL];
        for (_, label) in self.bindings() {
            if !required.contains(&label) {
                required.push(label);
            }
        }
        required
    }
}

/// A test case assembled at run time around a shared template, such as one
/// loaded from the settings' `templates_dir`.
#[derive(Debug, Clone)]
pub struct TemplateTestCase {
    name: String,
    template: Arc<RequestTemplate>,
    soap_action: String,
    service_name: Option<String>,
    bindings: Vec<(String, String)>,
    raw: Vec<String>,
}

impl TemplateTestCase {
    /// Named after the template until [`with_name`](Self::with_name) says otherwise.
    pub fn new<S: Into<String>>(template: Arc<RequestTemplate>, soap_action: S) -> Self {
        Self {
            name: template.name().to_string(),
            template,
            soap_action: soap_action.into(),
            service_name: None,
            bindings: Vec::new(),
            raw: Vec::new(),
        }
    }

    pub fn from_set<S: Into<String>>(
        templates: &TemplateSet,
        template_name: &str,
        soap_action: S,
    ) -> Result<Self> {
        templates
            .get(template_name)
            .map(|template| Self::new(template, soap_action))
            .ok_or_else(|| Error::Config(format!("no template named {:?}", template_name)))
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_service<S: Into<String>>(mut self, service_name: S) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    pub fn bind<S1: Into<String>, S2: Into<String>>(mut self, placeholder: S1, label: S2) -> Self {
        self.bindings.push((placeholder.into(), label.into()));
        self
    }

    pub fn bind_raw<S1: Into<String>, S2: Into<String>>(mut self, placeholder: S1, label: S2) -> Self {
        let placeholder = placeholder.into();
        self.raw.push(placeholder.clone());
        self.bind(placeholder, label)
    }
}

impl TestCase for TemplateTestCase {
    fn name(&self) -> &str {
        &self.name
    }

    fn template(&self) -> &RequestTemplate {
        &self.template
    }

    fn soap_action(&self) -> &str {
        &self.soap_action
    }

    fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    fn bindings(&self) -> Vec<(&str, &str)> {
        self.bindings
            .iter()
            .map(|(placeholder, label)| (placeholder.as_str(), label.as_str()))
            .collect()
    }

    fn raw_placeholders(&self) -> Vec<&str> {
        self.raw.iter().map(String::as_str).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Text(String),
    Object(serde_json::Value),
}

impl ParameterValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParameterValue::Text(text) => Some(text),
            ParameterValue::Object(serde_json::Value::String(text)) => Some(text),
            ParameterValue::Object(_) => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Text(text) => f.write_str(text),
            ParameterValue::Object(serde_json::Value::String(text)) => f.write_str(text),
            ParameterValue::Object(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for ParameterValue {
    fn from(text: &str) -> Self {
        ParameterValue::Text(String::from(text))
    }
}

impl From<String> for ParameterValue {
    fn from(text: String) -> Self {
        ParameterValue::Text(text)
    }
}

impl From<serde_json::Value> for ParameterValue {
    fn from(value: serde_json::Value) -> Self {
        ParameterValue::Object(value)
    }
}

/// Ordered `(label, value)` input of one test step. Labels are
/// case-sensitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters(Vec<(String, ParameterValue)>);

impl Parameters {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with<L: Into<String>, V: Into<ParameterValue>>(mut self, label: L, value: V) -> Self {
        self.push(label, value);
        self
    }

    pub fn push<L: Into<String>, V: Into<ParameterValue>>(&mut self, label: L, value: V) {
        self.0.push((label.into(), value.into()));
    }

    pub fn get(&self, label: &str) -> Option<&ParameterValue> {
        self.0.iter().find(|(l, _)| l == label).map(|(_, v)| v)
    }

    pub fn require(&self, label: &str) -> Result<&ParameterValue> {
        self.get(label)
            .ok_or_else(|| Error::MissingParameter(label.to_string()))
    }

    pub fn check_unique(&self) -> Result<()> {
        for (i, (label, _)) in self.0.iter().enumerate() {
            if self.0[..i].iter().any(|(seen, _)| seen == label) {
                return Err(Error::DuplicateParameter(label.clone()));
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.0.iter().map(|(l, v)| (l.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<L: Into<String>, V: Into<ParameterValue>> FromIterator<(L, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (L, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(label, value)| (label.into(), value.into()))
                .collect(),
        )
    }
}

/// Ordered `(label, value)` output of one test step. Empty means success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepResult(Vec<(String, ParameterValue)>);

impl StepResult {
    pub fn success() -> Self {
        Self(Vec::new())
    }

    pub fn failure<S: Into<String>>(message: S) -> Self {
        Self(vec![(
            String::from(labels::ERROR),
            ParameterValue::Text(message.into()),
        )])
    }

    pub fn is_success(&self) -> bool {
        self.error().is_none()
    }

    pub fn error(&self) -> Option<&str> {
        self.0
            .iter()
            .find(|(label, _)| label == labels::ERROR)
            .and_then(|(_, value)| value.as_text())
    }

    pub fn entries(&self) -> &[(String, ParameterValue)] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<(String, ParameterValue)> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A step's result together with the record it produced.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub result: StepResult,
    pub record: Arc<TransactionLogRecord>,
}

pub struct TestCaseDriver<C: TestCase> {
    test_case: C,
    client: ServiceClient,
    transactions: LogTransactionManager,
    runtime: Option<Runtime>,
    last_record: Mutex<Option<Arc<TransactionLogRecord>>>,
}

impl<C: TestCase> TestCaseDriver<C> {
    pub fn new(test_case: C, configuration: &HarnessConfiguration) -> Result<Self> {
        let settings = configuration.settings();
        let client = ServiceClient::new(
            configuration.transport(),
            configuration.handler_chain(),
            settings.soap_version,
        );
        let transactions = LogTransactionManager::new(configuration.sink())
            .with_sink_timeout(settings.sink_timeout())
            .with_fallback(configuration.fallback_log());

        Ok(Self {
            test_case,
            client,
            transactions,
            runtime: Some(Runtime::new()?),
            last_record: Mutex::new(None),
        })
    }

    pub fn test_case(&self) -> &C {
        &self.test_case
    }

    pub fn run_test(&self, parameters: &Parameters) -> StepResult {
        self.run_step(parameters).result
    }

    /// Like [`run_test`](Self::run_test), also returning the closed record.
    pub fn run_step(&self, parameters: &Parameters) -> StepReport {
        let step_name = parameters
            .get(labels::TEST_STEP)
            .map(|value| value.to_string())
            .unwrap_or_else(|| self.test_case.name().to_string());
        let span = info_span!("test_step", test_case = self.test_case.name(), step = %step_name);
        let _enter = span.enter();

        let (result, outcome) =
            self.transactions
                .scoped(&step_name, Some(self.test_case.name()), |record| {
                    panic::catch_unwind(AssertUnwindSafe(|| self.execute(parameters, record)))
                        .unwrap_or_else(|payload| Err(Error::StepPanicked(panic_message(payload))))
                });

        let mut messages = Vec::new();
        if let Err(e) = &result {
            messages.push(e.to_string());
        }
        if let Some(e) = outcome.delivery_error() {
            messages.push(e.to_string());
        }

        let result = if messages.is_empty() {
            info!(correlation_id = %outcome.record.correlation_id(), "test step passed");
            StepResult::success()
        } else {
            let message = messages.join("; ");
            warn!(correlation_id = %outcome.record.correlation_id(), error = %message, "test step failed");
            StepResult::failure(message)
        };

        if let Ok(mut last_record) = self.last_record.lock() {
            *last_record = Some(outcome.record.clone());
        }

        StepReport {
            result,
            record: outcome.record,
        }
    }

    /// The record closed by the most recent step.
    pub fn last_record(&self) -> Option<Arc<TransactionLogRecord>> {
        self.last_record.lock().ok().and_then(|last| last.clone())
    }

    fn execute(&self, parameters: &Parameters, record: &mut RecordDraft) -> Result<()> {
        parameters.check_unique()?;
        for label in self.test_case.required_parameters() {
            parameters.require(label)?;
        }

        let url = parameters.require(labels::URL)?.to_string();
        let body = self
            .test_case
            .template()
            .substitute_with_raw(&self.bindings(parameters)?, &self.test_case.raw_placeholders())?;
        let port = self.client.port(url)?;

        let runtime = self.runtime()?;
        let action = self.test_case.soap_action();
        let service_name = self.test_case.service_name();
        let mut call = move || runtime.block_on(port.invoke(action, service_name, &body, record));

        let response = if Handle::try_current().is_ok() {
            // block_on cannot nest on a thread that already drives a runtime.
            thread::scope(|scope| scope.spawn(call).join())
                .unwrap_or_else(|payload| panic::resume_unwind(payload))?
        } else {
            call()?
        };

        if let Some(fault) = soap::extract_fault(&response.body) {
            return Err(Error::SoapFault(fault));
        }
        if !response.is_success() {
            return Err(Error::UnexpectedStatus(response.status_code));
        }

        Ok(())
    }

    fn runtime(&self) -> Result<&Runtime> {
        self.runtime
            .as_ref()
            .ok_or_else(|| Error::Config(String::from("driver runtime already shut down")))
    }

    fn bindings(&self, parameters: &Parameters) -> Result<HashMap<String, String>> {
        self.test_case
            .bindings()
            .into_iter()
            .map(|(placeholder, label)| {
                parameters
                    .require(label)
                    .map(|value| (placeholder.to_string(), value.to_string()))
            })
            .collect()
    }
}

impl<C: TestCase> Drop for TestCaseDriver<C> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // Dropping a runtime blocks, which async contexts forbid.
            if Handle::try_current().is_ok() {
                runtime.shutdown_background();
            }
        }
    }
}

impl<C: TestCase + fmt::Debug> fmt::Debug for TestCaseDriver<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCaseDriver")
            .field("test_case", &self.test_case)
            .field("client", &self.client)
            .field("transactions", &self.transactions)
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::{RequestData, ResponseData},
        sink::MemoryLogSink,
        transport::SoapTransport,
    };
    use async_trait::async_trait;
    use serde_json::json;

    static FORM_TEMPLATE: RequestTemplate =
        RequestTemplate::from_static("retrieve_form", "<Form id=\"{formId}\"/>");

    #[derive(Debug)]
    struct RetrieveForm;

    impl TestCase for RetrieveForm {
        fn name(&self) -> &str {
            "RetrieveForm"
        }

        fn template(&self) -> &RequestTemplate {
            &FORM_TEMPLATE
        }

        fn soap_action(&self) -> &str {
            "urn:ihe:iti:2007:RetrieveForm"
        }

        fn bindings(&self) -> Vec<(&str, &str)> {
            vec![("formId", "formID")]
        }
    }

    #[derive(Debug)]
    struct Scripted {
        status_code: u16,
        body: &'static str,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(status_code: u16, body: &'static str) -> Self {
            Self {
                status_code,
                body,
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl SoapTransport for Scripted {
        async fn call(&self, request_data: &RequestData) -> Result<ResponseData> {
            *self.calls.lock().unwrap() += 1;
            let body = if self.body.is_empty() {
                request_data.body.clone()
            } else {
                String::from(self.body)
            };
            Ok(ResponseData {
                status_code: self.status_code,
                headers: HashMap::new(),
                body,
            })
        }
    }

    #[derive(Debug)]
    struct Exploding;

    #[async_trait]
    impl SoapTransport for Exploding {
        async fn call(&self, _: &RequestData) -> Result<ResponseData> {
            panic!("transport exploded")
        }
    }

    fn driver_for<C: TestCase>(
        test_case: C,
        transport: Arc<dyn SoapTransport + Send + Sync>,
    ) -> (TestCaseDriver<C>, Arc<MemoryLogSink>) {
        let sink = Arc::new(MemoryLogSink::new());
        let mut configuration = HarnessConfiguration::new(sink.clone());
        configuration.set_transport(transport);
        (TestCaseDriver::new(test_case, &configuration).unwrap(), sink)
    }

    fn driver(transport: Arc<Scripted>) -> (TestCaseDriver<RetrieveForm>, Arc<MemoryLogSink>) {
        driver_for(RetrieveForm, transport)
    }

    fn form(form_id: &str) -> Parameters {
        Parameters::new()
            .with(labels::URL, "http://x")
            .with("formID", form_id)
    }

    #[test]
    fn successful_step_returns_empty_result() {
        let transport = Arc::new(Scripted::new(200, ""));
        let (driver, sink) = driver(transport.clone());

        let result = driver.run_test(
            &Parameters::new()
                .with(labels::URL, "http://x")
                .with("formID", "F123"),
        );

        assert!(result.is_empty());
        assert_eq!(transport.calls(), 1);
        let record = driver.last_record().unwrap();
        assert!(record.request_body().unwrap().contains("<Form id=\"F123\"/>"));
        assert_eq!(record.response_code(), Some(200));
        assert_eq!(record.test_case(), Some("RetrieveForm"));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn missing_parameter_is_reported_without_calling_out() {
        let transport = Arc::new(Scripted::new(200, ""));
        let (driver, sink) = driver(transport.clone());

        let result = driver.run_test(&Parameters::new().with(labels::URL, "http://x"));

        assert_eq!(
            result.into_inner(),
            vec![(
                String::from("error"),
                ParameterValue::from("missing parameter: formID")
            )]
        );
        assert_eq!(transport.calls(), 0);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        let transport = Arc::new(Scripted::new(200, ""));
        let (driver, _) = driver(transport.clone());

        let result = driver.run_test(
            &vec![("url", "http://x"), ("formID", "A"), ("formID", "B")]
                .into_iter()
                .collect::<Parameters>(),
        );

        assert_eq!(result.error(), Some("duplicate parameter: formID"));
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn soap_fault_is_an_error_after_the_record_is_populated() {
        let fault = "<s:Envelope xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\"><s:Body><s:Fault>\
                     <s:Reason><s:Text xml:lang=\"en\">unknown form</s:Text></s:Reason>\
                     </s:Fault></s:Body></s:Envelope>";
        let (driver, _) = driver(Arc::new(Scripted::new(500, fault)));

        let report = driver.run_step(
            &Parameters::new()
                .with(labels::URL, "http://x")
                .with("formID", "nope")
                .with(labels::TEST_STEP, "retrieve unknown form"),
        );

        assert_eq!(report.result.error(), Some("SOAP fault: unknown form"));
        assert_eq!(report.record.test_step(), "retrieve unknown form");
        assert_eq!(report.record.response_code(), Some(500));
        assert_eq!(report.record.error(), Some("SOAP fault: unknown form"));
    }

    #[test]
    fn non_success_status_is_an_error() {
        let (driver, _) = driver(Arc::new(Scripted::new(503, "<busy/>")));

        let result = driver.run_test(
            &Parameters::new()
                .with(labels::URL, "http://x")
                .with("formID", "F1"),
        );

        assert_eq!(result.error(), Some("unexpected HTTP status 503"));
    }

    #[test]
    fn structured_values_bind_as_text() {
        let (driver, _) = driver(Arc::new(Scripted::new(200, "")));

        let report = driver.run_step(
            &Parameters::new()
                .with(labels::URL, "http://x")
                .with("formID", json!("F-json")),
        );

        assert!(report.result.is_success());
        assert!(report.record.request_body().unwrap().contains("<Form id=\"F-json\"/>"));
    }

    #[test]
    fn malformed_url_is_reported() {
        let transport = Arc::new(Scripted::new(200, ""));
        let (driver, _) = driver(transport.clone());

        let result = driver.run_test(
            &Parameters::new()
                .with(labels::URL, "not a url")
                .with("formID", "F1"),
        );

        assert_eq!(result.len(), 1);
        assert!(!result.is_success());
        assert_eq!(transport.calls(), 0);
    }

    #[test]
    fn markup_characters_in_values_are_escaped() {
        let transport = Arc::new(Scripted::new(200, ""));
        let (driver, _) = driver(transport.clone());

        let report = driver.run_step(&form("A&B <1>"));

        assert!(report.result.is_success(), "{:?}", report.result);
        assert_eq!(transport.calls(), 1);
        let body = report.record.request_body().unwrap();
        assert!(body.contains("<Form id=\"A&amp;B &lt;1&gt;\"/>"));
        assert!(crate::xml::check_well_formed(body).is_ok());
    }

    #[test]
    fn invalid_template_is_a_single_error_without_a_call() {
        let transport = Arc::new(Scripted::new(200, ""));
        let test_case = TemplateTestCase::new(
            Arc::new(RequestTemplate::new("note", "<Note>{body}</Note>")),
            "urn:example:Note",
        )
        .bind_raw("body", "note");
        let (driver, sink) = driver_for(test_case, transport.clone());

        let result = driver.run_test(
            &Parameters::new()
                .with(labels::URL, "http://x")
                .with("note", "<unclosed>"),
        );

        assert_eq!(result.len(), 1);
        assert!(result.error().unwrap().starts_with("invalid template note: "));
        assert_eq!(transport.calls(), 0);
        assert_eq!(sink.len(), 1);
        let record = &sink.records()[0];
        assert_eq!(record.error(), result.error());
        assert_eq!(record.test_case(), Some("note"));
        assert!(!record.has_response());
    }

    #[test]
    fn panicking_transport_becomes_an_error_entry() {
        let (driver, sink) = driver_for(RetrieveForm, Arc::new(Exploding));

        let result = driver.run_test(&form("F1"));

        assert_eq!(result.len(), 1);
        assert_eq!(result.error(), Some("test step panicked: transport exploded"));
        assert_eq!(sink.len(), 1);
        assert_eq!(
            sink.records()[0].error(),
            Some("test step panicked: transport exploded")
        );
    }

    #[tokio::test]
    async fn steps_run_from_async_code() {
        let transport = Arc::new(Scripted::new(200, ""));
        let (driver, sink) = driver(transport.clone());

        let result = driver.run_test(&form("F123"));

        assert!(result.is_success(), "{:?}", result);
        assert_eq!(transport.calls(), 1);
        assert_eq!(sink.len(), 1);
        drop(driver);
    }

    #[test]
    fn template_test_case_runs_from_a_template_set() {
        let mut templates = TemplateSet::default();
        templates.insert(RequestTemplate::new(
            "submit_form",
            "<Submit id=\"{formId}\">{content}</Submit>",
        ));
        let test_case = TemplateTestCase::from_set(&templates, "submit_form", "urn:example:Submit")
            .unwrap()
            .with_name("SubmitForm")
            .with_service("FormReceiver")
            .bind("formId", "formID")
            .bind_raw("content", "content");
        assert_eq!(test_case.required_parameters(), vec!["url", "formID", "content"]);
        let transport = Arc::new(Scripted::new(200, ""));
        let (driver, _) = driver_for(test_case, transport.clone());

        let report = driver.run_step(&form("A&B").with("content", "<q1>yes</q1>"));

        assert!(report.result.is_success(), "{:?}", report.result);
        assert_eq!(report.record.test_case(), Some("SubmitForm"));
        assert_eq!(report.record.soap().service_name.as_deref(), Some("FormReceiver"));
        assert!(report
            .record
            .request_body()
            .unwrap()
            .contains("<Submit id=\"A&amp;B\"><q1>yes</q1></Submit>"));
    }

    #[test]
    fn unknown_template_name_is_a_configuration_error() {
        match TemplateTestCase::from_set(&TemplateSet::default(), "missing", "urn:x") {
            Err(Error::Config(message)) => assert!(message.contains("missing")),
            other => panic!("expected a configuration error, got {:?}", other),
        }
    }

    #[test]
    fn required_parameters_list_url_then_bindings() {
        assert_eq!(RetrieveForm.required_parameters(), vec!["url", "formID"]);
    }
}
