//! HTTP exchange seam.
//!
//! Connectors speak to devices through [`HttpExchange`] so protocol logic (sessions,
//! digest challenges, XML error mapping) runs the same against `reqwest` and against the
//! scripted exchanges used in tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::{Duration, Instant};

use super::error::{CommandError, CommandResult};
use crate::logging::log_device_command;
use crate::storage::ByteStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: url::Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: url::Url) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: url::Url, body: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            headers: Vec::new(),
            body: Some(body.into()),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Path plus query, as used in digest authorization
    pub fn request_uri(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Every value of a repeated header (`Set-Cookie`)
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> CommandResult<&str> {
        std::str::from_utf8(&self.body)
            .map_err(|error| CommandError::parse(format!("response is not UTF-8: {error}")))
    }
}

/// Streaming response used for media downloads
pub struct HttpStream {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ByteStream,
}

impl HttpStream {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

impl std::fmt::Debug for HttpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStream")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish()
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

#[async_trait]
pub trait HttpExchange: Send + Sync + 'static {
    async fn execute(&self, request: HttpRequest) -> CommandResult<HttpResponse>;

    /// Streaming variant; the default buffers the whole body
    async fn stream(&self, request: HttpRequest) -> CommandResult<HttpStream> {
        let response = self.execute(request).await?;
        let body = response.body.clone();
        Ok(HttpStream {
            status: response.status,
            headers: response.headers,
            body: futures::stream::once(async move { Ok(body) }).boxed(),
        })
    }
}

#[async_trait]
impl<T: HttpExchange + ?Sized> HttpExchange for std::sync::Arc<T> {
    async fn execute(&self, request: HttpRequest) -> CommandResult<HttpResponse> {
        (**self).execute(request).await
    }

    async fn stream(&self, request: HttpRequest) -> CommandResult<HttpStream> {
        (**self).stream(request).await
    }
}

/// Production exchange over `reqwest` with rustls
#[derive(Debug, Clone)]
pub struct ReqwestExchange {
    client: reqwest::Client,
    device_id: String,
}

impl ReqwestExchange {
    pub fn new(device_id: impl Into<String>, timeout: Duration) -> CommandResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|error| CommandError::protocol(format!("cannot build HTTP client: {error}")))?;
        Ok(Self {
            client,
            device_id: device_id.into(),
        })
    }

    fn build(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(request.url),
            HttpMethod::Post => self.client.post(request.url),
        };
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        builder
    }

    fn headers(response: &reqwest::Response) -> Vec<(String, String)> {
        response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl HttpExchange for ReqwestExchange {
    async fn execute(&self, request: HttpRequest) -> CommandResult<HttpResponse> {
        let started = Instant::now();
        let path = request.url.path().to_string();
        let response = self.build(request).send().await?;
        let status = response.status().as_u16();
        let headers = Self::headers(&response);
        let body = response.bytes().await?;
        log_device_command(
            &self.device_id,
            &path,
            &status.to_string(),
            started.elapsed().as_millis() as u64,
        );
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn stream(&self, request: HttpRequest) -> CommandResult<HttpStream> {
        let response = self.build(request).send().await?;
        let status = response.status().as_u16();
        let headers = Self::headers(&response);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed();
        Ok(HttpStream {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = HttpResponse::new(200, "ok")
            .with_header("Set-Cookie", "BREEZESESSION=abc; Path=/")
            .with_header("set-cookie", "other=1");
        assert_eq!(response.header("SET-COOKIE"), Some("BREEZESESSION=abc; Path=/"));
        assert_eq!(response.header_values("set-cookie").count(), 2);
        assert!(response.is_success());
        assert_eq!(response.text().unwrap(), "ok");
    }

    #[test]
    fn test_request_uri_includes_query() {
        let url = url::Url::parse("https://tcs.example.org/tcs/SoapServer.php?x=1").unwrap();
        assert_eq!(HttpRequest::get(url).request_uri(), "/tcs/SoapServer.php?x=1");
    }
}
