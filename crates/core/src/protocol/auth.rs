//! RTSP authentication (RFC 2617 Basic and Digest, as used by RFC 2326 §12.5).
//!
//! The realm and nonce are fixed for the lifetime of a server. Every 401
//! offers both schemes so clients can retry with whichever they support:
//!
//! ```text
//! WWW-Authenticate: Digest realm="rtsp-streamer", nonce="<32 hex>"
//! WWW-Authenticate: Basic realm="rtsp-streamer"
//! ```
//!
//! Digest without `qop` (RFC 2069 compatible):
//!
//! ```text
//! HA1      = MD5(username:realm:password)
//! HA2      = MD5(method:digest-uri)
//! response = MD5(HA1:nonce:HA2)
//! ```
//!
//! With `qop=auth`, `response = MD5(HA1:nonce:nc:cnonce:qop:HA2)`.

use std::collections::HashMap;

use base64::prelude::{BASE64_STANDARD, Engine as _};

/// Username and password a client must present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

/// Checks `Authorization` headers against the configured credentials.
#[derive(Debug, Clone)]
pub struct Authenticator {
    credentials: Option<Credentials>,
    realm: String,
    nonce: String,
}

impl Authenticator {
    /// Create an authenticator with a fresh random nonce.
    pub fn new(credentials: Option<Credentials>, realm: &str) -> Self {
        let nonce = format!("{:032x}", rand::random::<u128>());
        Self::with_nonce(credentials, realm, &nonce)
    }

    pub fn with_nonce(credentials: Option<Credentials>, realm: &str, nonce: &str) -> Self {
        Self {
            credentials,
            realm: realm.to_string(),
            nonce: nonce.to_string(),
        }
    }

    /// Whether requests must be authenticated at all.
    pub fn is_enabled(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Check a request's `Authorization` header value.
    ///
    /// Always passes when no credentials are configured.
    pub fn authorize(&self, method: &str, authorization: Option<&str>) -> bool {
        let Some(credentials) = &self.credentials else {
            return true;
        };
        let Some(header) = authorization.map(str::trim) else {
            return false;
        };

        let (scheme, params) = header.split_once(' ').unwrap_or((header, ""));
        if scheme.eq_ignore_ascii_case("Basic") {
            self.verify_basic(credentials, params.trim())
        } else if scheme.eq_ignore_ascii_case("Digest") {
            self.verify_digest(credentials, method, params)
        } else {
            tracing::debug!(scheme, "unsupported authorization scheme");
            false
        }
    }

    /// `WWW-Authenticate` header values for a 401 response, Digest first.
    pub fn challenges(&self) -> [String; 2] {
        [
            format!("Digest realm=\"{}\", nonce=\"{}\"", self.realm, self.nonce),
            format!("Basic realm=\"{}\"", self.realm),
        ]
    }

    fn verify_basic(&self, credentials: &Credentials, encoded: &str) -> bool {
        let Ok(decoded) = BASE64_STANDARD.decode(encoded) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        match decoded.split_once(':') {
            Some((user, pass)) => user == credentials.username && pass == credentials.password,
            None => false,
        }
    }

    fn verify_digest(&self, credentials: &Credentials, method: &str, params: &str) -> bool {
        let params = parse_digest_params(params);
        let field = |name: &str| params.get(name).map(String::as_str);

        let (Some(username), Some(nonce), Some(uri), Some(response)) = (
            field("username"),
            field("nonce"),
            field("uri"),
            field("response"),
        ) else {
            tracing::debug!("digest authorization missing fields");
            return false;
        };

        if username != credentials.username || nonce != self.nonce {
            return false;
        }
        if field("realm").is_some_and(|realm| realm != self.realm) {
            return false;
        }

        let ha1 = md5_hex(&format!(
            "{}:{}:{}",
            credentials.username, self.realm, credentials.password
        ));
        let ha2 = md5_hex(&format!("{}:{}", method, uri));

        let expected = match (field("qop"), field("nc"), field("cnonce")) {
            (Some(qop), Some(nc), Some(cnonce)) => {
                md5_hex(&format!("{}:{}:{}:{}:{}:{}", ha1, nonce, nc, cnonce, qop, ha2))
            }
            _ => md5_hex(&format!("{}:{}:{}", ha1, nonce, ha2)),
        };

        expected.eq_ignore_ascii_case(response)
    }
}

/// Digest response for the no-`qop` form, as a client computes it.
pub fn digest_response(
    credentials: &Credentials,
    realm: &str,
    nonce: &str,
    method: &str,
    uri: &str,
) -> String {
    let ha1 = md5_hex(&format!(
        "{}:{}:{}",
        credentials.username, realm, credentials.password
    ));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));
    md5_hex(&format!("{}:{}:{}", ha1, nonce, ha2))
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Parse `key="value", key=value, ...`. Quoted values may contain commas.
fn parse_digest_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else {
            break;
        };
        let key = rest[..eq].trim().trim_start_matches(',').trim().to_ascii_lowercase();
        rest = rest[eq + 1..].trim_start();

        let value;
        if let Some(quoted) = rest.strip_prefix('"') {
            match quoted.find('"') {
                Some(end) => {
                    value = quoted[..end].to_string();
                    rest = &quoted[end + 1..];
                }
                None => {
                    value = quoted.to_string();
                    rest = "";
                }
            }
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            value = rest[..end].trim().to_string();
            rest = &rest[end..];
        }

        params.insert(key, value);
        rest = rest.trim_start().trim_start_matches(',').trim_start();
    }

    params
}
