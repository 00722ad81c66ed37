pub mod stub_server;

use std::{
    io::{self, Write},
    sync::{Arc, Mutex},
};
use wirelog::wirelog_test_case;

#[wirelog_test_case(
    template = "templates/form.xml",
    action = "urn:example:forms:Retrieve",
    service = "FormService",
    bind(formId = "formID")
)]
#[derive(Debug, Clone, Copy)]
pub struct FormTest;

/// Installs a fmt subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("wirelog=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Writer sharing its bytes, for inspecting the fallback log.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub_server::{refused_url, Behaviour, StubServer};
    use std::{
        thread,
        time::{Duration, Instant},
    };
    use wirelog::{
        labels,
        sink::{HttpLogSink, MemoryLogSink},
        FallbackLog, HarnessConfiguration, HarnessSettings, ParameterValue, Parameters,
        TemplateTestCase, TestCaseDriver,
    };

    fn memory_configuration() -> (HarnessConfiguration, Arc<MemoryLogSink>) {
        init_tracing();
        let sink = Arc::new(MemoryLogSink::new());
        (HarnessConfiguration::new(sink.clone()), sink)
    }

    fn form_parameters(url: String, form_id: &str) -> Parameters {
        Parameters::new()
            .with(labels::URL, url)
            .with("formID", form_id)
    }

    #[test]
    fn echoed_request_is_logged_end_to_end() {
        let service = StubServer::start(Behaviour::Echo);
        let (configuration, sink) = memory_configuration();
        let driver = TestCaseDriver::new(FormTest, &configuration).unwrap();

        let result = driver.run_test(&form_parameters(service.url("/forms"), "F123"));

        assert_eq!(result.into_inner(), vec![]);
        let record = driver.last_record().unwrap();
        assert!(record.request_body().unwrap().contains("<Form id=\"F123\"/>"));
        assert!(record.response_body().unwrap().contains("<Form id=\"F123\"/>"));
        assert_eq!(record.response_code(), Some(200));
        assert_eq!(record.http().method.as_deref(), Some("POST"));
        assert_eq!(record.http().path.as_deref(), Some("/forms"));
        assert_eq!(record.soap().action.as_deref(), Some("urn:example:forms:Retrieve"));
        assert_eq!(sink.records(), vec![(*record).clone()]);

        let received = service.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].path, "/forms");
        assert!(received[0]
            .content_type
            .as_deref()
            .unwrap()
            .starts_with("application/soap+xml"));
    }

    #[test]
    fn missing_parameter_makes_no_call() {
        let service = StubServer::start(Behaviour::Echo);
        let (configuration, sink) = memory_configuration();
        let driver = TestCaseDriver::new(FormTest, &configuration).unwrap();

        let result = driver.run_test(&Parameters::new().with(labels::URL, service.url("/forms")));

        assert_eq!(
            result.into_inner(),
            vec![(
                String::from("error"),
                ParameterValue::from("missing parameter: formID")
            )]
        );
        assert!(service.received().is_empty());
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.records()[0].response_code(), None);
    }

    #[test]
    fn unreachable_sink_does_not_block_the_step() {
        init_tracing();
        let service = StubServer::start(Behaviour::Echo);
        let fallback = SharedBuffer::default();
        let mut configuration = HarnessConfiguration::new(Arc::new(
            HttpLogSink::new(refused_url("/records"), Duration::from_secs(1)).unwrap(),
        ));
        configuration.set_sink_timeout(Duration::from_secs(1));
        configuration.set_fallback_log(FallbackLog::to_writer(fallback.clone()));
        let driver = TestCaseDriver::new(FormTest, &configuration).unwrap();

        let started = Instant::now();
        let result = driver.run_test(&form_parameters(service.url("/forms"), "F123"));

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.len(), 1);
        assert!(result.error().unwrap().starts_with("log delivery failed: "));
        assert_eq!(service.received().len(), 1);

        let line: serde_json::Value = serde_json::from_str(fallback.contents().trim()).unwrap();
        assert_eq!(
            line["record"]["correlation_id"],
            driver.last_record().unwrap().correlation_id().to_string()
        );
    }

    #[test]
    fn stalled_sink_is_abandoned_after_the_sink_timeout() {
        init_tracing();
        let service = StubServer::start(Behaviour::Echo);
        let collector = StubServer::start(Behaviour::Stall(Duration::from_secs(10)));
        let yaml = format!(
            "sink_timeout_ms: 300\nlog_sink: collector\nsinks:\n  collector:\n    kind: http\n    url: \"{}\"\n",
            collector.url("/records")
        );
        let mut configuration =
            HarnessConfiguration::from_settings(HarnessSettings::from_yaml_str(&yaml).unwrap())
                .unwrap();
        configuration.set_fallback_log(FallbackLog::to_writer(SharedBuffer::default()));
        let driver = TestCaseDriver::new(FormTest, &configuration).unwrap();

        let started = Instant::now();
        let result = driver.run_test(&form_parameters(service.url("/forms"), "F123"));

        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(result.error().unwrap().starts_with("log delivery failed: "));
    }

    #[test]
    fn network_and_delivery_errors_are_combined() {
        init_tracing();
        let mut configuration = HarnessConfiguration::new(Arc::new(
            HttpLogSink::new(refused_url("/records"), Duration::from_secs(1)).unwrap(),
        ));
        configuration.set_fallback_log(FallbackLog::to_writer(SharedBuffer::default()));
        let driver = TestCaseDriver::new(FormTest, &configuration).unwrap();

        let result = driver.run_test(&form_parameters(refused_url("/forms"), "F123"));

        let error = result.error().unwrap();
        assert_eq!(result.len(), 1);
        assert!(error.starts_with("network error: "));
        assert!(error.contains("; log delivery failed: "));
    }

    #[test]
    fn call_timeout_keeps_send_side_metadata() {
        let service = StubServer::start(Behaviour::Stall(Duration::from_secs(5)));
        let (mut configuration, sink) = memory_configuration();
        configuration.set_call_timeout(Duration::from_millis(200));
        let driver = TestCaseDriver::new(FormTest, &configuration).unwrap();

        let started = Instant::now();
        let result = driver.run_test(&form_parameters(service.url("/forms"), "F123"));

        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(result.error().unwrap().starts_with("network error: no response from"));

        let record = &sink.records()[0];
        assert_eq!(record.http().method.as_deref(), Some("POST"));
        assert_eq!(record.soap().action.as_deref(), Some("urn:example:forms:Retrieve"));
        assert_eq!(record.soap().service_name.as_deref(), Some("FormService"));
        assert!(record.soap().message_id.is_some());
        assert!(record.request_body().unwrap().contains("<Form id=\"F123\"/>"));
        assert!(!record.has_response());
        assert!(record.error().unwrap().starts_with("network error"));
    }

    #[test]
    fn http_sink_posts_record_as_json() {
        init_tracing();
        let service = StubServer::start(Behaviour::Echo);
        let collector = StubServer::start(Behaviour::Echo);
        let configuration = HarnessConfiguration::new(Arc::new(
            HttpLogSink::new(collector.url("/records"), Duration::from_secs(2)).unwrap(),
        ));
        let driver = TestCaseDriver::new(FormTest, &configuration).unwrap();

        let report = driver.run_step(
            &form_parameters(service.url("/forms"), "F7").with(labels::TEST_STEP, "retrieve F7"),
        );

        assert!(report.result.is_success());
        let posted = collector.received();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].method, "POST");
        assert_eq!(posted[0].path, "/records");
        let json: serde_json::Value = serde_json::from_str(&posted[0].body).unwrap();
        assert_eq!(json["correlation_id"], report.record.correlation_id().to_string());
        assert_eq!(json["test_step"], "retrieve F7");
        assert_eq!(json["http"]["response_code"], 200);
    }

    #[test]
    fn markdown_sink_from_settings_file() {
        init_tracing();
        let service = StubServer::start(Behaviour::Echo);
        let dir = tempfile::tempdir().unwrap();
        let settings_path = dir.path().join("wirelog.yaml");
        std::fs::write(
            &settings_path,
            format!(
                "log_sink: files\nsinks:\n  files:\n    kind: markdown\n    directory: \"{}\"\n",
                dir.path().join("logs").display()
            ),
        )
        .unwrap();
        let configuration =
            HarnessConfiguration::from_settings(HarnessSettings::load(&settings_path).unwrap())
                .unwrap();
        let driver = TestCaseDriver::new(FormTest, &configuration).unwrap();

        let report = driver.run_step(&form_parameters(service.url("/forms"), "F123"));

        assert!(report.result.is_success());
        let logs: Vec<_> = std::fs::read_dir(dir.path().join("logs"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(logs.len(), 1);
        let transaction = wirelog::sink::load_markdown(&logs[0]).unwrap().remove(0);
        assert_eq!(transaction.correlation_id, report.record.correlation_id());
        assert_eq!(transaction.status_code, Some(200));
    }

    #[test]
    fn templates_dir_feeds_test_cases_built_at_run_time() {
        init_tracing();
        let service = StubServer::start(Behaviour::Echo);
        let dir = tempfile::tempdir().unwrap();
        let settings_path = dir.path().join("wirelog.yaml");
        std::fs::write(
            &settings_path,
            format!(
                "templates_dir: \"{}/templates\"\n",
                env!("CARGO_MANIFEST_DIR")
            ),
        )
        .unwrap();
        let mut configuration =
            HarnessConfiguration::from_settings(HarnessSettings::load(&settings_path).unwrap())
                .unwrap();
        let sink = Arc::new(MemoryLogSink::new());
        configuration.set_sink(sink.clone());

        let templates = configuration.settings().load_templates().unwrap();
        assert_eq!(templates.names().collect::<Vec<_>>(), vec!["form"]);
        let test_case = TemplateTestCase::from_set(&templates, "form", "urn:example:forms:Retrieve")
            .unwrap()
            .with_service("FormService")
            .bind("formId", "formID");
        let driver = TestCaseDriver::new(test_case, &configuration).unwrap();

        let report = driver.run_step(&form_parameters(service.url("/forms"), "R&D"));

        assert!(report.result.is_success(), "{:?}", report.result);
        assert_eq!(report.record.test_case(), Some("form"));
        assert!(service.received()[0].body.contains("<Form id=\"R&amp;D\"/>"));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn concurrent_steps_get_their_own_records() {
        let service = StubServer::start(Behaviour::Echo);
        let (configuration, sink) = memory_configuration();
        let driver = Arc::new(TestCaseDriver::new(FormTest, &configuration).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let driver = driver.clone();
                let url = service.url("/forms");
                thread::spawn(move || driver.run_step(&form_parameters(url, &format!("F{}", i))))
            })
            .collect();
        let reports: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(sink.len(), 4);
        for (i, report) in reports.iter().enumerate() {
            assert!(report.result.is_success());
            assert!(report
                .record
                .request_body()
                .unwrap()
                .contains(&format!("<Form id=\"F{}\"/>", i)));
        }
        let mut ids: Vec<_> = reports.iter().map(|r| r.record.correlation_id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }
}
