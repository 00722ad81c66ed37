//! SOAP envelope and WS-Addressing helpers.

use crate::xml;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// SOAP namespace URIs.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const WSA_NS: &str = "http://www.w3.org/2005/08/addressing";

/// SOAP protocol version used for the outbound binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoapVersion {
    Soap11,
    Soap12,
}

impl SoapVersion {
    pub fn namespace(self) -> &'static str {
        match self {
            SoapVersion::Soap11 => SOAP_11_NS,
            SoapVersion::Soap12 => SOAP_12_NS,
        }
    }

    /// `Content-Type` for a request carrying `action`. SOAP 1.1 moves the
    /// action into a separate `SOAPAction` header instead.
    pub fn content_type(self, action: &str) -> String {
        match self {
            SoapVersion::Soap11 => String::from("text/xml; charset=utf-8"),
            SoapVersion::Soap12 => format!(
                "application/soap+xml; charset=utf-8; action=\"{}\"",
                action
            ),
        }
    }
}

impl Default for SoapVersion {
    fn default() -> Self {
        SoapVersion::Soap12
    }
}

/// WS-Addressing headers of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Addressing {
    pub action: Option<String>,
    pub message_id: Option<String>,
    pub to: Option<String>,
}

impl Addressing {
    /// Addressing for a new outbound message with a fresh message id.
    pub fn outbound<S1: Into<String>, S2: Into<String>>(action: S1, to: S2) -> Self {
        Self {
            action: Some(action.into()),
            message_id: Some(new_message_id()),
            to: Some(to.into()),
        }
    }
}

pub fn new_message_id() -> String {
    format!("urn:uuid:{}", Uuid::new_v4())
}

/// Wraps a request fragment in a SOAP envelope carrying the WS-Addressing
/// headers present in `addressing`.
pub fn wrap_envelope(version: SoapVersion, addressing: &Addressing, payload: &str) -> String {
    let mut envelope = format!(
        "<soap:Envelope xmlns:soap=\"{}\" xmlns:wsa=\"{}\">",
        version.namespace(),
        WSA_NS
    );

    envelope.push_str("<soap:Header>");
    if let Some(action) = &addressing.action {
        envelope.push_str(&format!("<wsa:Action>{}</wsa:Action>", xml::escape(action)));
    }
    if let Some(message_id) = &addressing.message_id {
        envelope.push_str(&format!(
            "<wsa:MessageID>{}</wsa:MessageID>",
            xml::escape(message_id)
        ));
    }
    if let Some(to) = &addressing.to {
        envelope.push_str(&format!("<wsa:To>{}</wsa:To>", xml::escape(to)));
    }
    envelope.push_str("</soap:Header>");

    envelope.push_str("<soap:Body>");
    envelope.push_str(strip_declaration(payload));
    envelope.push_str("</soap:Body></soap:Envelope>");

    envelope
}

// A declaration is only legal at the very start of a document.
fn strip_declaration(payload: &str) -> &str {
    let payload = payload.trim_start();
    if payload.starts_with("<?xml") {
        if let Some(end) = payload.find("?>") {
            return payload[end + 2..].trim_start();
        }
    }
    payload
}

/// Reads the WS-Addressing headers of an envelope. Missing or malformed
/// parts are simply absent.
pub fn extract_addressing(envelope: &str) -> Addressing {
    Addressing {
        action: xml::element_text(envelope, "Header", "Action"),
        message_id: xml::element_text(envelope, "Header", "MessageID"),
        to: xml::element_text(envelope, "Header", "To"),
    }
}

/// Fault reason carried by the body of `envelope`, if the body is a fault.
///
/// Handles both SOAP 1.1 (`faultstring`) and SOAP 1.2 (`Reason/Text`).
pub fn extract_fault(envelope: &str) -> Option<String> {
    if !xml::contains_element(envelope, "Body", "Fault") {
        return None;
    }

    xml::element_text(envelope, "Fault", "faultstring")
        .or_else(|| xml::element_text(envelope, "Reason", "Text"))
        .or_else(|| Some(String::from("unspecified fault")))
}

/// Extract SOAPAction from HTTP header value (removes quotes).
pub fn parse_soap_action(header_value: &str) -> String {
    header_value.trim().trim_matches('"').to_string()
}

/// The `action` parameter of a SOAP 1.2 content type.
pub fn action_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .filter_map(|param| {
            let mut parts = param.splitn(2, '=');
            match (parts.next(), parts.next()) {
                (Some(key), Some(value)) if key.trim().eq_ignore_ascii_case("action") => {
                    Some(parse_soap_action(value))
                }
                _ => None,
            }
        })
        .find(|action| !action.is_empty())
}
