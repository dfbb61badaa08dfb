//! Two-legged OAuth 1.0a request signing (HMAC-SHA1).
//!
//! The signature covers the method, the base URI (scheme, host, port, path)
//! and every query parameter plus the `oauth_*` protocol parameters, as laid
//! out in RFC 5849 section 3.4.1. JSON bodies are not part of the signature.

use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha1::Sha1;
use url::Url;
use uuid::Uuid;

use crate::credentials::Credentials;
use crate::http::HttpMethod;

type HmacSha1 = Hmac<Sha1>;

/// Everything except the RFC 3986 unreserved characters is escaped.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub const SIGNATURE_METHOD: &str = "HMAC-SHA1";
pub const OAUTH_VERSION: &str = "1.0";

/// Percent-encode a string the way OAuth requires (space becomes `%20`).
pub fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}

/// Token key and secret for three-legged use. The client itself always signs
/// two-legged (no token).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub token: String,
    pub secret: String,
}

/// Single-use signing material. A fresh token is generated for every attempt
/// so nonces are never replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub nonce: String,
    pub timestamp: i64,
    pub token: Option<TokenPair>,
}

impl AccessToken {
    pub fn generate() -> Self {
        Self {
            nonce: Uuid::new_v4().simple().to_string(),
            timestamp: Utc::now().timestamp(),
            token: None,
        }
    }
}

/// Signs requests on behalf of one consumer.
#[derive(Debug, Clone)]
pub struct OAuthSigner {
    credentials: Credentials,
}

impl OAuthSigner {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Produce the `Authorization` header value for a request to `url`.
    pub fn authorization(&self, method: HttpMethod, url: &Url, token: &AccessToken) -> String {
        let mut oauth_params = self.protocol_params(token);
        let signature = self.signature(method, url, &oauth_params, token);
        oauth_params.push(("oauth_signature".to_string(), signature));

        let fields: Vec<String> = oauth_params
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", percent_encode(k), percent_encode(v)))
            .collect();
        format!("OAuth {}", fields.join(", "))
    }

    /// Base64 HMAC-SHA1 signature over the signature base string.
    pub fn signature(
        &self,
        method: HttpMethod,
        url: &Url,
        oauth_params: &[(String, String)],
        token: &AccessToken,
    ) -> String {
        let base = signature_base_string(method, url, oauth_params);
        let token_secret = token.token.as_ref().map_or("", |t| t.secret.as_str());
        let key = format!(
            "{}&{}",
            percent_encode(&self.credentials.consumer_secret),
            percent_encode(token_secret)
        );

        let mut mac =
            HmacSha1::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
        mac.update(base.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    fn protocol_params(&self, token: &AccessToken) -> Vec<(String, String)> {
        let mut params = vec![
            ("oauth_consumer_key".to_string(), self.credentials.consumer_key.clone()),
            ("oauth_nonce".to_string(), token.nonce.clone()),
            ("oauth_signature_method".to_string(), SIGNATURE_METHOD.to_string()),
            ("oauth_timestamp".to_string(), token.timestamp.to_string()),
        ];
        if let Some(pair) = &token.token {
            params.push(("oauth_token".to_string(), pair.token.clone()));
        }
        params.push(("oauth_version".to_string(), OAUTH_VERSION.to_string()));
        params
    }
}

/// `METHOD&enc(base-uri)&enc(normalized-params)`.
pub fn signature_base_string(
    method: HttpMethod,
    url: &Url,
    oauth_params: &[(String, String)],
) -> String {
    let mut base_uri = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        base_uri.push_str(&format!(":{port}"));
    }
    base_uri.push_str(url.path());

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (percent_encode(&k), percent_encode(&v)))
        .chain(
            oauth_params
                .iter()
                .map(|(k, v)| (percent_encode(k), percent_encode(v))),
        )
        .collect();
    pairs.sort();

    let normalized = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "{}&{}&{}",
        method.as_str(),
        percent_encode(&base_uri),
        percent_encode(&normalized)
    )
}
