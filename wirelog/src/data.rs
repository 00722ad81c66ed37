use std::collections::HashMap;

/// Outbound side of one exchange, as seen at the wire boundary.
///
/// The SOAP fields are filled by the port that built the envelope; handlers
/// fall back to the headers and the envelope itself when they are absent.
#[derive(Debug, Clone, Default)]
pub struct RequestData {
    pub endpoint: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub soap_action: Option<String>,
    pub message_id: Option<String>,
    pub service_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseData {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ResponseData {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}
