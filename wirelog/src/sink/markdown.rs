use super::LogSink;
use crate::{
    error::{Error, Result},
    record::TransactionLogRecord,
};
use fs::File;
use lazy_static::lazy_static;
use regex::Regex;
use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tracing::debug;
use uuid::Uuid;

lazy_static! {
    static ref HEADER_REGEX: Regex =
        Regex::new(r"(?m)(?P<header_key>[a-zA-Z0-9_\-]+): (?P<header_value>.*?)$").unwrap();
    static ref MARKDOWN_REGEX: Regex = Regex::new(
        "(?ms)\
            \\#\\# Transaction (?P<correlation_id>[0-9a-f\\-]+): (?P<http_method>[A-Z]*) (?P<uri>[^ \r\n]*)\
            .*?\\#\\#\\# Test step: (?P<test_step>[^\r\n]*)\
            .*?\\#\\#\\# SOAP metadata.*?\
            ```\\s*(?P<soap_part>.*?)\\s*```.*?\
            \\#\\#\\# Request headers recorded.*?\
            ```\\s*(?P<request_headers_part>.*?)\\s*```.*?\
            \\#\\#\\# Request body recorded.*?\
            ```\\s*(?P<request_body_part>.*?)\\s*```.*?\
            \\#\\#\\# Response headers recorded.*?\
            ```\\s*(?P<response_headers_part>.*?)\\s*```.*?\
            \\#\\#\\# Response body recorded \\((?P<status_code>[0-9]+|-)[^)]*\\).*?\
            ```\\s*(?P<response_body_part>.*?)\\s*```.*?\
            \\#\\#\\# Error.*?\
            ```\\s*(?P<error_part>.*?)\\s*```"
    )
    .unwrap();
}

/// One transaction as read back from a markdown log.
#[derive(Debug, Clone)]
pub struct MarkdownTransaction {
    pub correlation_id: Uuid,
    pub test_step: String,
    pub method: String,
    pub uri: String,
    pub soap: BTreeMap<String, String>,
    pub request_headers: BTreeMap<String, String>,
    pub request_body: String,

    pub status_code: Option<u16>,
    pub response_headers: BTreeMap<String, String>,
    pub response_body: String,
    pub error: Option<String>,
}

/// Writes each record to its own markdown file in a directory.
#[derive(Debug, Clone)]
pub struct MarkdownLogSink {
    directory: PathBuf,
}

impl MarkdownLogSink {
    pub fn new<P: Into<PathBuf>>(directory: P) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        Ok(Self { directory })
    }

    pub fn path_for(&self, record: &TransactionLogRecord) -> PathBuf {
        let step: String = record
            .test_step()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();

        self.directory
            .join(format!("{}-{}.md", step, record.correlation_id()))
    }
}

impl LogSink for MarkdownLogSink {
    fn deliver(&self, record: &TransactionLogRecord) -> Result<()> {
        let path = self.path_for(record);
        let partial = path.with_extension("md.partial");

        // Readers never see a half-written record.
        let written = save_record(&partial, record)
            .and_then(|_| fs::rename(&partial, &path).map_err(Error::from));
        if let Err(e) = written {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }

        debug!(
            correlation_id = %record.correlation_id(),
            path = %path.display(),
            "transaction record written"
        );

        Ok(())
    }
}

pub fn save_record<P: AsRef<Path>>(markdown_path: P, record: &TransactionLogRecord) -> Result<()> {
    let mut file = File::create(markdown_path.as_ref())?;
    let http = record.http();
    let soap = record.soap();
    let uri = match &http.query {
        Some(query) => format!("{}?{}", http.path.as_deref().unwrap_or(""), query),
        None => http.path.clone().unwrap_or_default(),
    };

    write!(
        file,
        "## Transaction {}: {} {}\r\n\r\n",
        record.correlation_id(),
        http.method.as_deref().unwrap_or(""),
        uri
    )?;
    write!(
        file,
        "### Test step: {}\r\n\r\n",
        record.test_step()
    )?;

    write!(file, "### SOAP metadata:\r\n\r\n```\r\n")?;
    let soap_fields = [
        ("Action", &soap.action),
        ("Endpoint", &soap.endpoint),
        ("Message-Id", &soap.message_id),
        ("Service", &soap.service_name),
    ];
    for (key, value) in soap_fields.iter() {
        if let Some(value) = value {
            write!(file, "{}: {}\r\n", key, value)?;
        }
    }
    write!(file, "```\r\n\r\n")?;

    write!(file, "### Request headers recorded:\r\n\r\n```\r\n")?;
    for (key, value) in &http.request_headers {
        write!(file, "{}: {}\r\n", key, value)?;
    }
    write!(file, "```\r\n\r\n")?;

    write!(
        file,
        "### Request body recorded:\r\n\r\n```\r\n{}\r\n```\r\n\r\n",
        record.request_body().unwrap_or(""),
    )?;

    write!(file, "### Response headers recorded:\r\n\r\n```\r\n")?;
    for (key, value) in &http.response_headers {
        write!(file, "{}: {}\r\n", key, value)?;
    }
    write!(file, "```\r\n\r\n")?;

    let content_type = http
        .response_headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.as_str())
        .unwrap_or("");
    write!(
        file,
        "### Response body recorded ({}: {}):\r\n\r\n```\r\n{}\r\n```\r\n\r\n",
        http.response_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| String::from("-")),
        content_type,
        record.response_body().unwrap_or("")
    )?;

    write!(
        file,
        "### Error:\r\n\r\n```\r\n{}\r\n```\r\n\r\n",
        record.error().unwrap_or("")
    )?;

    file.sync_all()?;

    Ok(())
}

pub fn load_markdown<P: AsRef<Path>>(filename: P) -> Result<Vec<MarkdownTransaction>> {
    let file_contents = fs::read_to_string(filename.as_ref())?;
    let mut data = Vec::new();

    for captures in MARKDOWN_REGEX.captures_iter(&file_contents) {
        let correlation_id = Uuid::parse_str(&captures["correlation_id"])
            .map_err(|e| invalid_markdown(filename.as_ref(), e))?;
        let status_code = match &captures["status_code"] {
            "-" => None,
            code => Some(
                code.parse::<u16>()
                    .map_err(|e| invalid_markdown(filename.as_ref(), e))?,
            ),
        };
        let error = Some(captures["error_part"].to_string()).filter(|e| !e.is_empty());

        data.push(MarkdownTransaction {
            correlation_id,
            test_step: captures["test_step"].trim().to_string(),
            method: captures["http_method"].to_string(),
            uri: captures["uri"].to_string(),
            soap: parse_headers(&captures["soap_part"]),
            request_headers: parse_headers(&captures["request_headers_part"]),
            request_body: captures["request_body_part"].to_string(),
            status_code,
            response_headers: parse_headers(&captures["response_headers_part"]),
            response_body: captures["response_body_part"].to_string(),
            error,
        });
    }

    if data.is_empty() {
        Err(invalid_markdown(filename.as_ref(), "no transaction found"))
    } else {
        Ok(data)
    }
}

fn invalid_markdown<E: ToString>(path: &Path, reason: E) -> Error {
    Error::Config(format!(
        "{} is not a transaction log: {}",
        path.display(),
        reason.to_string()
    ))
}

fn parse_headers<T: AsRef<str>>(headers_part: T) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();

    for capture in HEADER_REGEX.captures_iter(headers_part.as_ref()) {
        headers.insert(
            String::from(capture["header_key"].trim()),
            String::from(capture["header_value"].trim()),
        );
    }

    headers
}
