//! Session handling and the request/response cycle.

use tracing::{debug, info, warn};

use super::AdobeInner;
use crate::connector::command::Command;
use crate::connector::error::{CommandError, CommandResult};
use crate::connector::http::{HttpExchange, HttpRequest};
use crate::connector::types::{Credentials, DeviceAddress};
use crate::connector::xml::XmlElement;

const SESSION_COOKIE: &str = "BREEZESESSION";
const API_PATH: &str = "api/xml";

#[derive(Debug, Default)]
pub(crate) struct Session {
    endpoint: Option<url::Url>,
    credentials: Option<Credentials>,
    token: Option<String>,
}

impl Session {
    pub fn address(&self) -> Option<String> {
        self.endpoint.as_ref().map(ToString::to_string)
    }
}

/// Fail on any status other than `ok`, keeping the device code and sub-code
pub(crate) fn check_status(action: &str, response: &XmlElement) -> CommandResult<()> {
    let status = response
        .find("status")
        .ok_or_else(|| CommandError::parse(format!("{action}: response has no status")))?;
    let code = status.attr("code").unwrap_or_default();
    if code == "ok" {
        return Ok(());
    }

    let invalid = status.child("invalid");
    let sub_code = status
        .attr("subcode")
        .or_else(|| invalid.and_then(|invalid| invalid.attr("subcode")))
        .map(str::to_string);
    let message = match invalid {
        Some(invalid) => format!(
            "invalid field '{}' ({})",
            invalid.attr("field").unwrap_or_default(),
            invalid.attr("type").unwrap_or_default()
        ),
        None => format!("device returned status {code}"),
    };
    Err(CommandError::failed(action, code, sub_code, message))
}

impl<H: HttpExchange> AdobeInner<H> {
    /// Remember the endpoint and log in
    pub(crate) async fn open_session(&self, address: &DeviceAddress, credentials: &Credentials) -> CommandResult<()> {
        let endpoint = address
            .join(API_PATH)
            .map_err(|error| CommandError::invalid_argument(format!("bad device address: {error}")))?;
        let mut session = self.session.lock().await;
        session.endpoint = Some(endpoint.clone());
        session.credentials = Some(credentials.clone());
        session.token = None;
        session.token = Some(self.login(&endpoint, credentials).await?);
        Ok(())
    }

    /// Log out, ignoring failures
    pub(crate) async fn close_session(&self) {
        let mut session = self.session.lock().await;
        if let (Some(endpoint), Some(token)) = (session.endpoint.clone(), session.token.take()) {
            if let Err(error) = self.send(&endpoint, Some(&token), &Command::new("logout")).await {
                debug!(device_id = %self.device_id, error = %error, "Logout failed");
            }
        }
        session.endpoint = None;
        session.credentials = None;
    }

    async fn login(&self, endpoint: &url::Url, credentials: &Credentials) -> CommandResult<String> {
        let command = Command::new("login")
            .param("login", credentials.username.clone())
            .param("password", credentials.password.clone());
        let url = with_query(endpoint, &command, None);
        let response = self.exchange.execute(HttpRequest::get(url)).await?;
        if !response.is_success() {
            return Err(CommandError::protocol(format!("login returned HTTP {}", response.status)));
        }
        check_status("login", &XmlElement::parse(response.text()?)?)?;

        let token = response
            .header_values("set-cookie")
            .find_map(session_cookie)
            .ok_or_else(|| CommandError::protocol("login response carried no session cookie"))?;
        info!(device_id = %self.device_id, "🔑 Adobe Connect session established");
        Ok(token)
    }

    /// Absolute web URL of a room `url-path` on the connected device
    pub(crate) async fn web_url(&self, url_path: &str) -> Option<String> {
        let session = self.session.lock().await;
        let endpoint = session.endpoint.as_ref()?;
        endpoint
            .join(&format!("/{}/", url_path.trim_matches('/')))
            .ok()
            .map(String::from)
    }

    /// Send a command, re-logging in once if the session expired
    pub(crate) async fn request(&self, command: Command) -> CommandResult<XmlElement> {
        let mut session = self.session.lock().await;
        let (Some(endpoint), Some(credentials)) = (session.endpoint.clone(), session.credentials.clone()) else {
            return Err(CommandError::not_connected(&self.device_id));
        };
        let token = match session.token.clone() {
            Some(token) => token,
            None => {
                let token = self.login(&endpoint, &credentials).await?;
                session.token = Some(token.clone());
                token
            }
        };

        match self.send(&endpoint, Some(&token), &command).await {
            Err(error) if error.has_code("no-access", Some("no-login")) => {
                warn!(device_id = %self.device_id, action = command.action(), "🔑 Session expired, logging in again");
                session.token = None;
                let token = self.login(&endpoint, &credentials).await?;
                session.token = Some(token.clone());
                self.send(&endpoint, Some(&token), &command).await
            }
            other => other,
        }
    }

    async fn send(&self, endpoint: &url::Url, token: Option<&str>, command: &Command) -> CommandResult<XmlElement> {
        debug!(device_id = %self.device_id, command = %command, "Sending Adobe Connect request");
        let url = with_query(endpoint, command, token);
        let response = self.exchange.execute(HttpRequest::get(url)).await?;
        if !response.is_success() {
            return Err(CommandError::protocol(format!(
                "{} returned HTTP {}",
                command.action(),
                response.status
            )));
        }
        let document = XmlElement::parse(response.text()?)?;
        check_status(command.action(), &document)?;
        Ok(document)
    }
}

fn with_query(endpoint: &url::Url, command: &Command, token: Option<&str>) -> url::Url {
    let mut url = endpoint.clone();
    let query = match token {
        Some(token) => command.clone().param("session", token).to_query(),
        None => command.to_query(),
    };
    url.set_query(Some(&query));
    url
}

fn session_cookie(header: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE && !value.is_empty()).then(|| value.to_string())
    })
}
