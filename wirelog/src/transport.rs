use crate::{
    data::{RequestData, ResponseData},
    error::{Error, Result},
    handler::HandlerChain,
    record::RecordDraft,
    soap::{self, Addressing, SoapVersion},
    util,
};
use async_trait::async_trait;
use hyper::{body, Body, Request, Uri};
use hyper_tls::HttpsConnector;
use std::{collections::HashMap, fmt::Debug, sync::Arc, time::Duration};
use tracing::debug;

#[async_trait]
pub trait SoapTransport: Debug {
    async fn call(&self, request_data: &RequestData) -> Result<ResponseData>;
}

#[derive(Debug, Clone)]
pub struct HyperTransport {
    timeout: Duration,
}

impl HyperTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn exchange(request_data: &RequestData) -> Result<ResponseData> {
        let mut request_builder = Request::builder()
            .uri(request_data.endpoint.as_str())
            .method(request_data.method.as_str());

        if let Some(headers_mut) = request_builder.headers_mut() {
            util::put_headers(
                headers_mut,
                request_data
                    .headers
                    .iter()
                    .filter(|(header_name, _)| !header_name.eq_ignore_ascii_case("host")),
            )?;
        }

        let request: Request<Body> = request_builder.body(request_data.body.clone().into())?;

        let client = hyper::Client::builder().build(HttpsConnector::new());

        let response = client.request(request).await?;

        let status_code = response.status().as_u16();
        let headers = util::extract_headers(response.headers());
        let body = body::to_bytes(response.into_body()).await?;
        let body: String = String::from_utf8_lossy(&body).into();

        Ok(ResponseData {
            status_code,
            headers,
            body,
        })
    }
}

#[async_trait]
impl SoapTransport for HyperTransport {
    async fn call(&self, request_data: &RequestData) -> Result<ResponseData> {
        match tokio::time::timeout(self.timeout, Self::exchange(request_data)).await {
            Ok(Err(Error::Hyper(e))) => Err(Error::Network(e.to_string())),
            Ok(result) => result,
            Err(_) => Err(Error::Network(format!(
                "no response from {} within {} ms",
                request_data.endpoint,
                self.timeout.as_millis()
            ))),
        }
    }
}

/// Hands out ports bound to concrete endpoint URLs. Every port shares the
/// client's transport and handler chain.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    transport: Arc<dyn SoapTransport + Send + Sync>,
    handlers: HandlerChain,
    soap_version: SoapVersion,
}

impl ServiceClient {
    pub fn new(
        transport: Arc<dyn SoapTransport + Send + Sync>,
        handlers: HandlerChain,
        soap_version: SoapVersion,
    ) -> Self {
        Self {
            transport,
            handlers,
            soap_version,
        }
    }

    pub fn port<S: Into<String>>(&self, endpoint: S) -> Result<ServicePort> {
        let endpoint = endpoint.into();
        let uri: Uri = endpoint.parse()?;
        let http = matches!(uri.scheme_str(), Some("http") | Some("https"));
        if !http || uri.authority().is_none() {
            return Err(Error::Network(format!(
                "{:?} is not an absolute http(s) URL",
                endpoint
            )));
        }

        Ok(ServicePort {
            endpoint,
            client: self.clone(),
        })
    }
}

/// One SOAP operation endpoint.
#[derive(Debug, Clone)]
pub struct ServicePort {
    endpoint: String,
    client: ServiceClient,
}

impl ServicePort {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn request_for(&self, action: &str, service_name: Option<&str>, payload: &str) -> RequestData {
        let version = self.client.soap_version;
        let addressing = Addressing::outbound(action, self.endpoint.as_str());

        let mut headers = HashMap::new();
        headers.insert(String::from("Content-Type"), version.content_type(action));
        if version == SoapVersion::Soap11 {
            headers.insert(String::from("SOAPAction"), format!("\"{}\"", action));
        }

        RequestData {
            endpoint: self.endpoint.clone(),
            method: String::from("POST"),
            headers,
            body: soap::wrap_envelope(version, &addressing, payload),
            soap_action: addressing.action.clone(),
            message_id: addressing.message_id.clone(),
            service_name: service_name.map(String::from),
        }
    }

    /// Sends `payload` as `action`. The send hooks have populated `record`
    /// before the transport is called; the receive hooks only run when a
    /// response arrived.
    pub async fn invoke(
        &self,
        action: &str,
        service_name: Option<&str>,
        payload: &str,
        record: &mut RecordDraft,
    ) -> Result<ResponseData> {
        let request = self.request_for(action, service_name, payload);
        self.client.handlers.on_send(&request, record);

        debug!(
            correlation_id = %record.correlation_id(),
            endpoint = %self.endpoint,
            action,
            "sending SOAP request"
        );

        let response = self.client.transport.call(&request).await?;
        self.client.handlers.on_receive(&response, record);

        debug!(
            correlation_id = %record.correlation_id(),
            status = response.status_code,
            "SOAP response received"
        );

        Ok(response)
    }
}
