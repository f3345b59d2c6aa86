//! SOAP request cycle with digest authentication.

use tracing::{debug, info};

use super::digest::DigestChallenge;
use super::TcsInner;
use crate::connector::command::Command;
use crate::connector::error::{CommandError, CommandResult};
use crate::connector::http::{HttpExchange, HttpRequest, HttpResponse, HttpStream};
use crate::connector::types::{Credentials, DeviceAddress};
use crate::connector::xml::{escape, XmlElement};

const API_PATH: &str = "tcs/SoapServer.php";
const NAMESPACE: &str = "http://www.tandberg.net/XML/Streaming/1.0";

/// Endpoint and credentials of the connected device
#[derive(Debug, Default)]
pub(crate) struct Endpoint {
    pub url: Option<url::Url>,
    pub credentials: Option<Credentials>,
}

/// Raw and parsed response of one call
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    pub raw: String,
    pub document: XmlElement,
}

pub(crate) fn envelope(command: &Command) -> String {
    let mut body = String::new();
    for (name, value) in command.parameters() {
        body.push_str(&format!("<tcs:{name}>{}</tcs:{name}>", escape(value)));
    }
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope" xmlns:tcs="{ns}">"#,
            "<env:Body><tcs:{action}>{body}</tcs:{action}></env:Body></env:Envelope>"
        ),
        ns = NAMESPACE,
        action = command.action(),
        body = body
    )
}

/// Turn a SOAP fault into a command failure
pub(crate) fn check_fault(action: &str, document: &XmlElement) -> CommandResult<()> {
    let Some(fault) = document.find("Fault") else {
        return Ok(());
    };
    let code = fault
        .find("Value")
        .map(|value| value.text.rsplit(':').next().unwrap_or_default().to_string())
        .filter(|code| !code.is_empty())
        .unwrap_or_else(|| "fault".to_string());
    let sub_code = fault
        .find("Subcode")
        .and_then(|sub| sub.find("Value"))
        .map(|value| value.text.clone());
    let message = fault
        .find("Text")
        .or_else(|| fault.find("faultstring"))
        .map(|text| text.text.clone())
        .unwrap_or_default();
    Err(CommandError::failed(action, code, sub_code, message))
}

impl<H: HttpExchange> TcsInner<H> {
    pub(crate) async fn open_endpoint(&self, address: &DeviceAddress, credentials: &Credentials) -> CommandResult<()> {
        let url = address
            .join(API_PATH)
            .map_err(|error| CommandError::invalid_argument(format!("bad device address: {error}")))?;
        {
            let mut endpoint = self.endpoint.lock().await;
            endpoint.url = Some(url);
            endpoint.credentials = Some(credentials.clone());
        }
        let reply = self.call(Command::new("GetSystemInformation")).await?;
        info!(
            device_id = %self.device_id,
            product = reply.document.find("ProductID").map(|p| p.text.as_str()).unwrap_or("unknown"),
            version = reply.document.find("SWVersion").map(|v| v.text.as_str()).unwrap_or("unknown"),
            "🔑 Content server reachable"
        );
        Ok(())
    }

    pub(crate) async fn close_endpoint(&self) {
        let mut endpoint = self.endpoint.lock().await;
        endpoint.url = None;
        endpoint.credentials = None;
    }

    pub(crate) async fn address(&self) -> Option<String> {
        self.endpoint.lock().await.url.as_ref().map(ToString::to_string)
    }

    /// Issue one SOAP call; the endpoint lock serializes calls to the device
    pub(crate) async fn call(&self, command: Command) -> CommandResult<Reply> {
        let endpoint = self.endpoint.lock().await;
        let (Some(url), Some(credentials)) = (endpoint.url.clone(), endpoint.credentials.clone()) else {
            return Err(CommandError::not_connected(&self.device_id));
        };
        debug!(device_id = %self.device_id, command = %command, "Sending content server request");

        let request = HttpRequest::post(url, envelope(&command))
            .header("Content-Type", "application/soap+xml; charset=utf-8");
        let response = self.authenticated(request, &credentials).await?;
        drop(endpoint);

        // Faults come back as 500 with a SOAP body
        if !response.is_success() && response.status != 500 {
            return Err(CommandError::protocol(format!(
                "{} returned HTTP {}",
                command.action(),
                response.status
            )));
        }
        let raw = response.text()?.to_string();
        let document = XmlElement::parse(&raw)?;
        check_fault(command.action(), &document)?;
        if !response.is_success() {
            return Err(CommandError::protocol(format!(
                "{} returned HTTP {}",
                command.action(),
                response.status
            )));
        }
        Ok(Reply { raw, document })
    }

    /// Send once, answer a 401 challenge once
    async fn authenticated(&self, request: HttpRequest, credentials: &Credentials) -> CommandResult<HttpResponse> {
        let response = self.exchange.execute(request.clone()).await?;
        if response.status != 401 {
            return Ok(response);
        }
        let challenge = response
            .header("www-authenticate")
            .ok_or_else(|| CommandError::protocol("401 without a challenge"))
            .and_then(DigestChallenge::parse)?;
        let authorization = challenge.authorization(credentials, request.method.as_str(), &request.request_uri());
        let response = self
            .exchange
            .execute(request.header("Authorization", authorization))
            .await?;
        if response.status == 401 {
            return Err(CommandError::protocol("digest authentication rejected"));
        }
        Ok(response)
    }

    /// Streaming GET with the same single-challenge authentication
    pub(crate) async fn download(&self, request: HttpRequest) -> CommandResult<HttpStream> {
        let credentials = self
            .endpoint
            .lock()
            .await
            .credentials
            .clone()
            .ok_or_else(|| CommandError::not_connected(&self.device_id))?;

        let stream = self.exchange.stream(request.clone()).await?;
        if stream.status != 401 {
            return Ok(stream);
        }
        let challenge = stream
            .header("www-authenticate")
            .ok_or_else(|| CommandError::protocol("401 without a challenge"))
            .and_then(DigestChallenge::parse)?;
        let authorization = challenge.authorization(&credentials, request.method.as_str(), &request.request_uri());
        let stream = self
            .exchange
            .stream(request.header("Authorization", authorization))
            .await?;
        if stream.status == 401 {
            return Err(CommandError::protocol("digest authentication rejected"));
        }
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_escapes_parameters() {
        let body = envelope(&Command::new("Dial").param("Number", "sip:a&b@example.org"));
        assert!(body.contains("<tcs:Dial><tcs:Number>sip:a&amp;b@example.org</tcs:Number></tcs:Dial>"));
        let parsed = XmlElement::parse(&body).unwrap();
        assert_eq!(parsed.find("Number").unwrap().text, "sip:a&b@example.org");
    }

    #[test]
    fn test_fault_mapping() {
        let fault = XmlElement::parse(
            r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"><env:Body><env:Fault>
            <env:Code><env:Value>env:Receiver</env:Value></env:Code>
            <env:Reason><env:Text>Conference not found</env:Text></env:Reason>
            </env:Fault></env:Body></env:Envelope>"#,
        )
        .unwrap();
        let error = check_fault("GetConference", &fault).unwrap_err();
        assert!(error.has_code("Receiver", None));
        assert!(error.to_string().contains("Conference not found"));
    }
}
