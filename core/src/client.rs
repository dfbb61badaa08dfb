//! Signed request execution against a configured base URL.
//!
//! # Design
//! `RestClient` owns the URI rules, header defaults, signing and the retry
//! policy. The actual I/O sits behind the [`Transport`] trait, so the whole
//! pipeline (including retries) is exercised in unit tests with a scripted
//! transport, and against the mock server in `tests/`.
//!
//! Credentials are resolved on first use and cached under a mutex for the
//! life of the client. Every attempt, retries included, is signed with a new
//! [`AccessToken`].

use parking_lot::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::credentials::{CredentialResolver, CredentialStore, Credentials, SettingsFile};
use crate::error::{ConfigError, CredentialError, RequestError};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::oauth::{percent_encode, AccessToken, OAuthSigner};
use crate::transport::{Transport, UreqTransport};

/// Total attempts for a request that keeps timing out (first try + 4 retries).
pub const MAX_ATTEMPTS: u32 = 5;

pub const EFFECTIVE_USER_HEADER: &str = "foreman_user";

/// Blocking client that signs every request with the consumer credentials.
#[derive(Debug)]
pub struct RestClient<T = UreqTransport> {
    config: ClientConfig,
    base_url: String,
    resolver: CredentialResolver,
    credentials: Mutex<Option<Credentials>>,
    transport: T,
}

/// URL, headers and body of a request before it is signed.
#[derive(Debug, Clone)]
struct Prepared {
    method: HttpMethod,
    url: Url,
    headers: Vec<(String, String)>,
    body: Option<String>,
}

impl RestClient<UreqTransport> {
    /// Client using `ureq` and the settings file named in `config` as the
    /// fallback credential store.
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let transport = UreqTransport::new(config.timeout(), config.ssl_ca.as_deref())?;
        let store = SettingsFile::new(config.settings_path.clone());
        Ok(Self::with_parts(config, Box::new(store), transport))
    }
}

impl<T: Transport> RestClient<T> {
    pub fn with_parts(config: ClientConfig, store: Box<dyn CredentialStore>, transport: T) -> Self {
        let resolver = CredentialResolver::new(
            config.resource_name.clone(),
            config.consumer_key.clone(),
            config.consumer_secret.clone(),
            store,
        );
        let mut base_url = config.base_url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            config,
            base_url,
            resolver,
            credentials: Mutex::new(None),
            transport,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Base URL joined with `path`. A leading `/` on `path` is dropped, and a
    /// path that would resolve outside the base is rejected.
    pub fn request_uri(&self, path: &str) -> Result<String, RequestError> {
        self.request_url(path).map(String::from)
    }

    /// [`request_uri`](Self::request_uri) plus the percent-encoded query, in
    /// the order given. This is the exact URI that is signed and sent.
    pub fn target_uri(&self, path: &str, params: &[(&str, &str)]) -> Result<String, RequestError> {
        self.target_url(path, params).map(String::from)
    }

    fn request_url(&self, path: &str) -> Result<Url, RequestError> {
        let relative = path.trim_start_matches('/');
        if relative.contains(&['?', '#'][..]) {
            return Err(RequestError::InvalidPath {
                path: path.to_string(),
                reason: "query and fragment must be passed as params",
            });
        }

        let uri = format!("{}{relative}", self.base_url);
        let url = Url::parse(&uri).map_err(|source| RequestError::InvalidUrl { uri, source })?;
        let base = Url::parse(&self.base_url).map_err(|source| RequestError::InvalidUrl {
            uri: self.base_url.clone(),
            source,
        })?;

        // Dot segments are resolved by the parser, so compare the result.
        if url.origin() != base.origin() || !url.path().starts_with(base.path()) {
            return Err(RequestError::InvalidPath {
                path: path.to_string(),
                reason: "path resolves outside the base URL",
            });
        }
        Ok(url)
    }

    fn target_url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, RequestError> {
        let mut url = self.request_url(path)?;
        if !params.is_empty() {
            let query = params
                .iter()
                .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            url.set_query(Some(&query));
        }
        Ok(url)
    }

    /// Build and sign a request without sending it.
    pub fn build_request(
        &self,
        method: HttpMethod,
        path: &str,
        params: &[(&str, &str)],
        body: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Result<HttpRequest, RequestError> {
        let prepared = self.prepare(method, path, params, body, headers)?;
        let signer = OAuthSigner::new(self.credentials()?);
        Ok(sign(&prepared, &signer))
    }

    /// Send a request, retrying on timeout.
    ///
    /// Any completed exchange is returned as-is, whatever its status; use
    /// [`classify`](crate::classify) to interpret it.
    pub fn send(
        &self,
        method: HttpMethod,
        path: &str,
        params: &[(&str, &str)],
        body: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse, RequestError> {
        let prepared = self.prepare(method, path, params, body, headers)?;
        let signer = OAuthSigner::new(self.credentials()?);
        let uri = prepared.url.to_string();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let request = sign(&prepared, &signer);

            debug!(%method, %uri, attempt, "Making request");
            match self.transport.execute(&request) {
                Ok(response) => {
                    debug!(%method, %uri, status = response.status, "Received response");
                    return Ok(response);
                }
                Err(e) if e.is_timeout() && attempt < MAX_ATTEMPTS => {
                    warn!(%uri, attempt, error = %e, "Timeout calling API, retrying");
                }
                Err(e) if e.is_timeout() => {
                    warn!(%uri, attempts = attempt, "Timeout calling API, giving up");
                    return Err(RequestError::Timeout {
                        uri,
                        attempts: attempt,
                    });
                }
                Err(source) => {
                    return Err(RequestError::Transport {
                        method: method.to_string(),
                        uri,
                        source,
                    });
                }
            }
        }
    }

    pub fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<HttpResponse, RequestError> {
        self.send(HttpMethod::Get, path, params, None, &[])
    }

    pub fn delete(&self, path: &str, params: &[(&str, &str)]) -> Result<HttpResponse, RequestError> {
        self.send(HttpMethod::Delete, path, params, None, &[])
    }

    pub fn post(&self, path: &str, body: &str) -> Result<HttpResponse, RequestError> {
        self.send(HttpMethod::Post, path, &[], Some(body), &[])
    }

    pub fn put(&self, path: &str, body: &str) -> Result<HttpResponse, RequestError> {
        self.send(HttpMethod::Put, path, &[], Some(body), &[])
    }

    pub fn patch(&self, path: &str, body: &str) -> Result<HttpResponse, RequestError> {
        self.send(HttpMethod::Patch, path, &[], Some(body), &[])
    }

    /// Resolve on first use; later calls reuse the cached pair. A failed
    /// resolution is not cached.
    fn credentials(&self) -> Result<Credentials, CredentialError> {
        let mut cached = self.credentials.lock();
        if let Some(credentials) = cached.as_ref() {
            return Ok(credentials.clone());
        }
        let credentials = self.resolver.resolve()?;
        *cached = Some(credentials.clone());
        Ok(credentials)
    }

    fn prepare(
        &self,
        method: HttpMethod,
        path: &str,
        params: &[(&str, &str)],
        body: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Result<Prepared, RequestError> {
        let url = self.target_url(path, params)?;

        let body = match body {
            Some(body) if method.carries_body() => Some(body.to_string()),
            Some(_) => {
                debug!(%method, "Ignoring request body");
                None
            }
            None => None,
        };

        Ok(Prepared {
            method,
            url,
            headers: self.merge_headers(headers),
            body,
        })
    }

    /// Defaults first; caller values replace defaults with the same name.
    fn merge_headers(&self, extra: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
            (
                EFFECTIVE_USER_HEADER.to_string(),
                self.config.effective_user.clone(),
            ),
        ];
        for (name, value) in extra {
            match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
                Some(existing) => existing.1 = value.to_string(),
                None => headers.push((name.to_string(), value.to_string())),
            }
        }
        headers
    }
}

fn sign(prepared: &Prepared, signer: &OAuthSigner) -> HttpRequest {
    let token = AccessToken::generate();
    let authorization = signer.authorization(prepared.method, &prepared.url, &token);

    let mut headers: Vec<(String, String)> = prepared
        .headers
        .iter()
        .filter(|(k, _)| !k.eq_ignore_ascii_case("Authorization"))
        .cloned()
        .collect();
    headers.push(("Authorization".to_string(), authorization));

    HttpRequest {
        method: prepared.method,
        url: prepared.url.to_string(),
        headers,
        body: prepared.body.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::credentials::StoredCredentials;
    use crate::error::TransportError;

    /// Replays scripted outcomes and records every request it sees. Once the
    /// script runs out it answers `200 {}`.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn attempts(&self) -> usize {
            self.seen.lock().len()
        }

        fn last(&self) -> HttpRequest {
            self.seen.lock().last().cloned().unwrap()
        }
    }

    impl Transport for ScriptedTransport {
        fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.lock().push(request.clone());
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(200, "{}")))
        }
    }

    struct CountingStore {
        reads: Arc<AtomicUsize>,
    }

    impl CredentialStore for CountingStore {
        fn load(&self) -> Option<StoredCredentials> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Some(StoredCredentials {
                oauth_consumer_key: Some("stored-key".to_string()),
                oauth_consumer_secret: Some("stored-secret".to_string()),
            })
        }
    }

    fn timeout() -> Result<HttpResponse, TransportError> {
        Err(TransportError::Timeout {
            reason: "Global".to_string(),
        })
    }

    fn client_with(
        config: ClientConfig,
        script: Vec<Result<HttpResponse, TransportError>>,
    ) -> (RestClient<ScriptedTransport>, Arc<AtomicUsize>) {
        let reads = Arc::new(AtomicUsize::new(0));
        let store = CountingStore {
            reads: Arc::clone(&reads),
        };
        let client = RestClient::with_parts(config, Box::new(store), ScriptedTransport::new(script));
        (client, reads)
    }

    fn client(script: Vec<Result<HttpResponse, TransportError>>) -> RestClient<ScriptedTransport> {
        let config = ClientConfig::new("https://foreman.example.com/api")
            .with_resource_name("proxy01")
            .with_consumer("key", "secret");
        client_with(config, script).0
    }

    #[test]
    fn base_url_gets_trailing_separator() {
        let c = client(vec![]);
        assert_eq!(
            c.request_uri("v2/hosts").unwrap(),
            "https://foreman.example.com/api/v2/hosts"
        );
    }

    #[test]
    fn base_url_with_trailing_separator_is_kept() {
        let config = ClientConfig::new("https://host/api/").with_consumer("key", "secret");
        let (c, _) = client_with(config, vec![]);
        assert_eq!(c.request_uri("v2/hosts").unwrap(), "https://host/api/v2/hosts");
    }

    #[test]
    fn leading_slash_does_not_escape_base() {
        let c = client(vec![]);
        assert_eq!(
            c.request_uri("/v2/hosts").unwrap(),
            "https://foreman.example.com/api/v2/hosts"
        );
    }

    #[test]
    fn query_is_percent_encoded_in_order() {
        let c = client(vec![]);
        assert_eq!(
            c.target_uri("v2/hosts", &[("search", "name=a b"), ("per_page", "20")])
                .unwrap(),
            "https://foreman.example.com/api/v2/hosts?search=name%3Da%20b&per_page=20"
        );
        assert_eq!(
            c.target_uri("v2/hosts", &[("per_page", "20"), ("search", "name=a b")])
                .unwrap(),
            "https://foreman.example.com/api/v2/hosts?per_page=20&search=name%3Da%20b"
        );
    }

    #[test]
    fn empty_params_add_no_query() {
        let c = client(vec![]);
        assert_eq!(
            c.target_uri("v2/hosts", &[]).unwrap(),
            "https://foreman.example.com/api/v2/hosts"
        );
    }

    #[test]
    fn dot_segments_cannot_leave_base() {
        let c = client(vec![]);
        for path in ["../admin/users", "a/../../x", "%2e%2e/admin", "..\\admin"] {
            let err = c.get(path, &[]).unwrap_err();
            assert!(matches!(err, RequestError::InvalidPath { .. }), "{path}: {err}");
        }
        assert_eq!(c.transport().attempts(), 0);
    }

    #[test]
    fn dot_segments_inside_base_are_resolved() {
        let c = client(vec![]);
        let uri = c.target_uri("v2/smart_proxies/../hosts", &[]).unwrap();
        assert_eq!(uri, "https://foreman.example.com/api/v2/hosts");

        c.get("v2/smart_proxies/../hosts", &[]).unwrap();
        assert_eq!(c.transport().last().url, uri);
    }

    #[test]
    fn query_or_fragment_in_path_is_rejected() {
        let c = client(vec![]);
        for path in ["v2/hosts#x", "v2/hosts?search=a"] {
            let err = c.get(path, &[("search", "a")]).unwrap_err();
            assert!(matches!(err, RequestError::InvalidPath { .. }), "{path}: {err}");
        }
        assert_eq!(c.transport().attempts(), 0);
    }

    #[test]
    fn sent_url_matches_target_uri() {
        let c = client(vec![]);
        let params = [("search", "os ~ \"RedHat 8\""), ("page", "2")];
        c.get("v2/hosts", &params).unwrap();
        assert_eq!(
            c.transport().last().url,
            c.target_uri("v2/hosts", &params).unwrap()
        );
    }

    #[test]
    fn default_headers_are_sent() {
        let c = client(vec![]);
        let req = c
            .build_request(HttpMethod::Get, "v2/hosts", &[], None, &[])
            .unwrap();
        assert_eq!(req.header("Accept"), Some("application/json"));
        assert_eq!(req.header("Content-Type"), Some("application/json"));
        assert_eq!(req.header("foreman_user"), Some("admin"));
        assert!(req.header("Authorization").unwrap().starts_with("OAuth "));
    }

    #[test]
    fn caller_headers_override_defaults() {
        let config = ClientConfig::new("https://foreman.example.com/api")
            .with_consumer("key", "secret")
            .with_effective_user("deploy");
        let (c, _) = client_with(config, vec![]);
        let req = c
            .build_request(
                HttpMethod::Get,
                "v2/hosts",
                &[],
                None,
                &[("accept", "text/plain"), ("X-Request-Id", "abc")],
            )
            .unwrap();
        assert_eq!(req.header("Accept"), Some("text/plain"));
        assert_eq!(req.header("X-Request-Id"), Some("abc"));
        assert_eq!(req.header("foreman_user"), Some("deploy"));
        assert_eq!(
            req.headers
                .iter()
                .filter(|(k, _)| k.eq_ignore_ascii_case("accept"))
                .count(),
            1
        );
    }

    #[test]
    fn body_only_sent_for_post_put_patch() {
        let c = client(vec![]);
        for method in [HttpMethod::Post, HttpMethod::Put, HttpMethod::Patch] {
            let req = c
                .build_request(method, "v2/hosts", &[], Some(r#"{"a":1}"#), &[])
                .unwrap();
            assert_eq!(req.body.as_deref(), Some(r#"{"a":1}"#), "{method}");
        }
        for method in [HttpMethod::Get, HttpMethod::Delete, HttpMethod::Head] {
            let req = c
                .build_request(method, "v2/hosts", &[], Some(r#"{"a":1}"#), &[])
                .unwrap();
            assert!(req.body.is_none(), "{method}");
        }
    }

    #[test]
    fn http_error_status_is_returned_not_retried() {
        let c = client(vec![Ok(HttpResponse::new(500, "boom"))]);
        let response = c.get("v2/hosts", &[]).unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(c.transport().attempts(), 1);
    }

    #[test]
    fn four_timeouts_then_success_returns_response() {
        let c = client(vec![
            timeout(),
            timeout(),
            timeout(),
            timeout(),
            Ok(HttpResponse::new(200, r#"{"id":1}"#)),
        ]);
        let response = c.get("v2/hosts", &[]).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, r#"{"id":1}"#);
        assert_eq!(c.transport().attempts(), 5);
    }

    #[test]
    fn five_timeouts_fail_with_uri() {
        let c = client(vec![timeout(), timeout(), timeout(), timeout(), timeout()]);
        let err = c.get("v2/hosts", &[("search", "a b")]).unwrap_err();
        match &err {
            RequestError::Timeout { uri, attempts } => {
                assert_eq!(uri, "https://foreman.example.com/api/v2/hosts?search=a%20b");
                assert_eq!(*attempts, MAX_ATTEMPTS);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("Timeout calling API at https://foreman.example.com"));
        assert_eq!(c.transport().attempts(), 5);
    }

    #[test]
    fn non_timeout_failure_is_not_retried() {
        let c = client(vec![Err(TransportError::Failure {
            reason: "connection refused".to_string(),
        })]);
        let err = c.delete("v2/hosts/1", &[]).unwrap_err();
        match err {
            RequestError::Transport { method, uri, source } => {
                assert_eq!(method, "DELETE");
                assert_eq!(uri, "https://foreman.example.com/api/v2/hosts/1");
                assert!(!source.is_timeout());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(c.transport().attempts(), 1);
    }

    #[test]
    fn every_attempt_is_signed_afresh() {
        let c = client(vec![timeout(), Ok(HttpResponse::new(200, "{}"))]);
        c.get("v2/hosts", &[]).unwrap();
        let seen = c.transport().seen.lock().clone();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0].header("Authorization"), seen[1].header("Authorization"));
    }

    #[test]
    fn credentials_resolved_once_across_calls() {
        let config = ClientConfig::new("https://foreman.example.com/api");
        let (c, reads) = client_with(config, vec![]);
        for _ in 0..10 {
            c.get("v2/hosts", &[]).unwrap();
        }
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert!(c
            .transport()
            .last()
            .header("Authorization")
            .unwrap()
            .contains("oauth_consumer_key=\"stored-key\""));
    }

    #[test]
    fn credentials_resolved_once_under_concurrent_first_use() {
        let config = ClientConfig::new("https://foreman.example.com/api");
        let (c, reads) = client_with(config, vec![]);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| c.get("v2/hosts", &[]).unwrap());
            }
        });
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(c.transport().attempts(), 8);
    }

    #[test]
    fn explicit_credentials_never_read_store() {
        let config = ClientConfig::new("https://foreman.example.com/api").with_consumer("key", "secret");
        let (c, reads) = client_with(config, vec![]);
        c.get("v2/hosts", &[]).unwrap();
        assert_eq!(reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_credentials_fail_before_sending() {
        struct EmptyStore;
        impl CredentialStore for EmptyStore {
            fn load(&self) -> Option<StoredCredentials> {
                None
            }
        }
        let config = ClientConfig::new("https://foreman.example.com/api").with_resource_name("proxy01");
        let c = RestClient::with_parts(config, Box::new(EmptyStore), ScriptedTransport::default());
        let err = c.get("v2/hosts", &[]).unwrap_err();
        assert!(matches!(err, RequestError::Credentials(_)));
        assert!(err.to_string().contains("proxy01"));
        assert_eq!(c.transport().attempts(), 0);
    }

    #[test]
    fn invalid_base_url_is_reported() {
        let config = ClientConfig::new("not a url").with_consumer("key", "secret");
        let (c, _) = client_with(config, vec![]);
        let err = c.get("v2/hosts", &[]).unwrap_err();
        assert!(matches!(err, RequestError::InvalidUrl { .. }));
        assert_eq!(err.uri(), Some("not a url/v2/hosts"));
    }
}
