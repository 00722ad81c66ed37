use async_trait::async_trait;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};
use tracing::debug;
use wirelog::{
    soap::{self, Addressing, SoapVersion},
    xml, RequestData, ResponseData, SoapTransport,
};

pub const RETRIEVE_FORM_ACTION: &str = "urn:ihe:iti:2007:RetrieveForm";
pub const SUBMIT_FORM_ACTION: &str = "urn:ihe:iti:2007:SubmitForm";

const RFD_NS: &str = "urn:ihe:iti:rfd:2007";

/// In-process form manager answering RFD retrieve and submit requests.
///
/// Stands in for the remote service so a suite can run without a network.
#[derive(Debug, Default)]
pub struct InMemoryFormManager {
    forms: BTreeMap<String, String>,
    submissions: Mutex<Vec<Submission>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub form_id: String,
    pub instance_id: String,
}

impl InMemoryFormManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes `form_id` at `url`.
    pub fn with_form<S1: Into<String>, S2: Into<String>>(mut self, form_id: S1, url: S2) -> Self {
        self.forms.insert(form_id.into(), url.into());
        self
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions
            .lock()
            .map(|submissions| submissions.clone())
            .unwrap_or_default()
    }

    fn retrieve(&self, form_id: &str) -> Result<String, String> {
        let url = self
            .forms
            .get(form_id)
            .ok_or_else(|| format!("unknown form {}", form_id))?;

        Ok(format!(
            "<RetrieveFormResponse xmlns=\"{}\"><form><URL>{}</URL></form>\
             <contentType>text/html</contentType><responseCode>OK</responseCode>\
             </RetrieveFormResponse>",
            RFD_NS,
            xml::escape(url)
        ))
    }

    fn submit(&self, form_id: &str, envelope: &str) -> Result<String, String> {
        if !self.forms.contains_key(form_id) {
            return Err(format!("unknown form {}", form_id));
        }
        let instance_id = xml::element_text(envelope, "Body", "instanceID")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| String::from("instanceID is required"))?;

        self.submissions
            .lock()
            .map_err(|_| String::from("submission store unavailable"))?
            .push(Submission {
                form_id: form_id.to_string(),
                instance_id,
            });

        Ok(format!(
            "<SubmitFormResponse xmlns=\"{}\"><responseCode>OK</responseCode></SubmitFormResponse>",
            RFD_NS
        ))
    }
}

#[async_trait]
impl SoapTransport for InMemoryFormManager {
    async fn call(&self, request_data: &RequestData) -> wirelog::Result<ResponseData> {
        let version = if request_data.body.contains(soap::SOAP_11_NS) {
            SoapVersion::Soap11
        } else {
            SoapVersion::Soap12
        };
        let action = request_data.soap_action.clone().unwrap_or_default();
        let form_id = xml::element_text(&request_data.body, "Body", "formID").unwrap_or_default();

        debug!(%action, %form_id, "form manager request");

        let outcome = match action.as_str() {
            RETRIEVE_FORM_ACTION => self.retrieve(&form_id),
            SUBMIT_FORM_ACTION => self.submit(&form_id, &request_data.body),
            other => Err(format!("unsupported action {}", other)),
        };

        let (status_code, payload) = match outcome {
            Ok(payload) => (200, payload),
            Err(reason) => (500, fault(version, &reason)),
        };
        let addressing = Addressing {
            action: Some(format!("{}Response", action)),
            message_id: Some(soap::new_message_id()),
            to: None,
        };

        let mut headers = HashMap::new();
        headers.insert(
            String::from("content-type"),
            version.content_type(&format!("{}Response", action)),
        );

        Ok(ResponseData {
            status_code,
            headers,
            body: soap::wrap_envelope(version, &addressing, &payload),
        })
    }
}

fn fault(version: SoapVersion, reason: &str) -> String {
    match version {
        SoapVersion::Soap11 => format!(
            "<soap:Fault><faultcode>soap:Client</faultcode><faultstring>{}</faultstring></soap:Fault>",
            xml::escape(reason)
        ),
        SoapVersion::Soap12 => format!(
            "<soap:Fault><soap:Code><soap:Value>soap:Sender</soap:Value></soap:Code>\
             <soap:Reason><soap:Text xml:lang=\"en\">{}</soap:Text></soap:Reason></soap:Fault>",
            xml::escape(reason)
        ),
    }
}
