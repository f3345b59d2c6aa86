//! HTTP Digest access authentication (RFC 2617, MD5).

use md5::{Digest, Md5};
use rand::Rng;

use crate::connector::error::{CommandError, CommandResult};
use crate::connector::types::Credentials;

/// Parameters of a `WWW-Authenticate: Digest ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    /// `auth` when the server offers it, otherwise the legacy RFC 2069 scheme
    pub qop: Option<String>,
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Split `key=value, key="quoted, value"` pairs
fn parameters(input: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = input.trim();
    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let after = after.trim_start();
        let (value, remaining) = if let Some(quoted) = after.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            }
        } else {
            match after.find(',') {
                Some(end) => (&after[..end], &after[end..]),
                None => (after, ""),
            }
        };
        pairs.push((key, value.trim().to_string()));
        rest = remaining.trim_start().trim_start_matches(',').trim_start();
    }
    pairs
}

impl DigestChallenge {
    pub fn parse(header: &str) -> CommandResult<Self> {
        let body = header
            .trim()
            .strip_prefix("Digest")
            .or_else(|| header.trim().strip_prefix("digest"))
            .ok_or_else(|| CommandError::protocol(format!("unsupported authentication scheme: {header}")))?;

        let pairs = parameters(body);
        let get = |name: &str| {
            pairs
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.clone())
        };
        let algorithm = get("algorithm").unwrap_or_else(|| "MD5".to_string());
        if !algorithm.eq_ignore_ascii_case("MD5") {
            return Err(CommandError::protocol(format!("unsupported digest algorithm {algorithm}")));
        }

        Ok(Self {
            realm: get("realm").ok_or_else(|| CommandError::protocol("digest challenge without realm"))?,
            nonce: get("nonce").ok_or_else(|| CommandError::protocol("digest challenge without nonce"))?,
            opaque: get("opaque"),
            qop: get("qop").and_then(|offered| {
                offered
                    .split(',')
                    .map(str::trim)
                    .find(|qop| *qop == "auth")
                    .map(str::to_string)
            }),
        })
    }

    /// Digest `response` value
    pub fn response(&self, credentials: &Credentials, method: &str, uri: &str, nc: &str, cnonce: &str) -> String {
        let ha1 = md5_hex(&format!("{}:{}:{}", credentials.username, self.realm, credentials.password));
        let ha2 = md5_hex(&format!("{method}:{uri}"));
        match &self.qop {
            Some(qop) => md5_hex(&format!("{ha1}:{}:{nc}:{cnonce}:{qop}:{ha2}", self.nonce)),
            None => md5_hex(&format!("{ha1}:{}:{ha2}", self.nonce)),
        }
    }

    /// Full `Authorization` header value for one request
    pub fn authorization(&self, credentials: &Credentials, method: &str, uri: &str) -> String {
        let cnonce = hex::encode(rand::thread_rng().gen::<[u8; 8]>());
        self.authorization_with(credentials, method, uri, "00000001", &cnonce)
    }

    fn authorization_with(&self, credentials: &Credentials, method: &str, uri: &str, nc: &str, cnonce: &str) -> String {
        let response = self.response(credentials, method, uri, nc, cnonce);
        let mut header = format!(
            r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", response="{}", algorithm=MD5"#,
            credentials.username, self.realm, self.nonce, uri, response
        );
        if let Some(qop) = &self.qop {
            header.push_str(&format!(r#", qop={qop}, nc={nc}, cnonce="{cnonce}""#));
        }
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(r#", opaque="{opaque}""#));
        }
        header
    }
}
