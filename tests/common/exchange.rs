use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;

use conference_broker::connector::{CommandResult, HttpExchange, HttpRequest, HttpResponse, HttpStream};

/// Streamed reply whose chunks may end in a dropped connection
#[derive(Debug, Clone)]
pub struct StreamReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub chunks: Vec<Result<Bytes, String>>,
}

impl StreamReply {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            chunks: Vec::new(),
        }
    }

    pub fn chunk(mut self, data: &[u8]) -> Self {
        self.chunks.push(Ok(Bytes::copy_from_slice(data)));
        self
    }

    pub fn dropped(mut self) -> Self {
        self.chunks.push(Err("connection reset by peer".to_string()));
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

pub type Responder = Arc<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// HTTP exchange answering from scripted replies keyed by request
///
/// The key is the `action` query parameter (XML API), the SOAP element inside the body,
/// or the URL path. One-shot replies are consumed first, in order; routes answer every
/// request of their key after that.
pub struct ScriptedExchange {
    requests: Mutex<Vec<HttpRequest>>,
    once: Mutex<Vec<(String, HttpResponse)>>,
    routes: Mutex<Vec<(String, Responder)>>,
    streams: Mutex<Vec<(String, StreamReply)>>,
    fallback: HttpResponse,
}

impl ScriptedExchange {
    pub fn new(fallback: HttpResponse) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            once: Mutex::new(Vec::new()),
            routes: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
            fallback,
        }
    }

    pub fn once(&self, key: &str, response: HttpResponse) -> &Self {
        self.once.lock().push((key.to_string(), response));
        self
    }

    pub fn route(&self, key: &str, response: HttpResponse) -> &Self {
        self.route_fn(key, move |_| response.clone())
    }

    /// Answer every request of `key` by inspecting it
    pub fn route_fn(&self, key: &str, responder: impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static) -> &Self {
        let mut routes = self.routes.lock();
        routes.retain(|(existing, _)| existing != key);
        routes.push((key.to_string(), Arc::new(responder)));
        self
    }

    pub fn stream_once(&self, key: &str, reply: StreamReply) -> &Self {
        self.streams.lock().push((key.to_string(), reply));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Keys of all requests so far, in order
    pub fn keys(&self) -> Vec<String> {
        self.requests.lock().iter().map(request_key).collect()
    }

    pub fn count(&self, key: &str) -> usize {
        self.keys().iter().filter(|k| k.as_str() == key).count()
    }

    pub fn requests_for(&self, key: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|request| request_key(request) == key)
            .cloned()
            .collect()
    }

    fn answer(&self, request: &HttpRequest) -> HttpResponse {
        let key = request_key(request);
        self.requests.lock().push(request.clone());
        {
            let mut once = self.once.lock();
            if let Some(position) = once.iter().position(|(k, _)| *k == key) {
                return once.remove(position).1;
            }
        }
        let responder = self
            .routes
            .lock()
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, responder)| Arc::clone(responder));
        match responder {
            Some(responder) => responder(request),
            None => self.fallback.clone(),
        }
    }
}

#[async_trait]
impl HttpExchange for ScriptedExchange {
    async fn execute(&self, request: HttpRequest) -> CommandResult<HttpResponse> {
        Ok(self.answer(&request))
    }

    async fn stream(&self, request: HttpRequest) -> CommandResult<HttpStream> {
        let key = request_key(&request);
        let scripted = {
            let mut streams = self.streams.lock();
            streams
                .iter()
                .position(|(k, _)| *k == key)
                .map(|position| streams.remove(position).1)
        };
        let Some(reply) = scripted else {
            let response = self.answer(&request);
            let body = response.body.clone();
            return Ok(HttpStream {
                status: response.status,
                headers: response.headers,
                body: futures::stream::once(async move { Ok(body) }).boxed(),
            });
        };

        self.requests.lock().push(request);
        let chunks: Vec<std::io::Result<Bytes>> = reply
            .chunks
            .into_iter()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .collect();
        Ok(HttpStream {
            status: reply.status,
            headers: reply.headers,
            body: futures::stream::iter(chunks).boxed(),
        })
    }
}

pub fn request_key(request: &HttpRequest) -> String {
    if let Some((_, action)) = request.url.query_pairs().find(|(name, _)| name == "action") {
        return action.into_owned();
    }
    const SOAP_BODY: &str = "<env:Body><tcs:";
    if let Some(body) = request.body.as_deref() {
        if let Some(index) = body.find(SOAP_BODY) {
            let rest = &body[index + SOAP_BODY.len()..];
            let end = rest.find(['>', ' ', '/']).unwrap_or(rest.len());
            return rest[..end].to_string();
        }
    }
    request.url.path().to_string()
}

pub fn query_param(request: &HttpRequest, name: &str) -> Option<String> {
    request
        .url
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

// ---- Adobe Connect XML API replies ----

pub fn adobe_ok(inner: &str) -> HttpResponse {
    HttpResponse::new(200, format!(r#"<results><status code="ok"/>{inner}</results>"#))
}

pub fn adobe_status(code: &str, sub_code: Option<&str>) -> HttpResponse {
    let sub_code = sub_code
        .map(|sub| format!(r#" subcode="{sub}""#))
        .unwrap_or_default();
    HttpResponse::new(200, format!(r#"<results><status code="{code}"{sub_code}/></results>"#))
}

pub fn adobe_login(token: &str) -> HttpResponse {
    adobe_ok("").with_header("Set-Cookie", format!("BREEZESESSION={token}; HttpOnly; path=/"))
}

pub fn adobe_no_data() -> HttpResponse {
    adobe_status("no-data", None)
}

// ---- content server SOAP replies ----

pub fn soap_ok(action: &str, inner: &str) -> HttpResponse {
    HttpResponse::new(
        200,
        format!(
            concat!(
                r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope">"#,
                r#"<env:Body><{action}Response xmlns="http://www.tandberg.net/XML/Streaming/1.0">"#,
                "<{action}Result>{inner}</{action}Result></{action}Response></env:Body></env:Envelope>"
            ),
            action = action,
            inner = inner
        ),
    )
}

pub fn soap_fault(code: &str, text: &str) -> HttpResponse {
    HttpResponse::new(
        500,
        format!(
            concat!(
                r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope"><env:Body><env:Fault>"#,
                "<env:Code><env:Value>env:{code}</env:Value></env:Code>",
                "<env:Reason><env:Text>{text}</env:Text></env:Reason>",
                "</env:Fault></env:Body></env:Envelope>"
            ),
            code = code,
            text = text
        ),
    )
}

pub fn digest_challenge() -> HttpResponse {
    HttpResponse::new(401, "").with_header(
        "WWW-Authenticate",
        r#"Digest realm="TCS", qop="auth", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#,
    )
}
