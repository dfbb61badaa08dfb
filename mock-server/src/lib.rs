//! In-process stand-in for the Foreman API, used by integration tests.
//!
//! Every route sits behind an OAuth 1.0a (HMAC-SHA1, two-legged) check that
//! is implemented independently of the client crate, so a signing bug on
//! either side shows up as a 401. Nonces are single-use.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::Engine;
use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha1::Sha1;
use tokio::{net::TcpListener, sync::RwLock};
use tracing::{debug, info};

pub const CONSUMER_KEY: &str = "mock-consumer-key";
pub const CONSUMER_SECRET: &str = "mock-consumer-secret";

/// How long `/api/slow` (and the first `FLAKY_SLOW_CALLS` hits of
/// `/api/flaky`) take to answer.
pub const SLOW_DELAY: Duration = Duration::from_millis(1500);
pub const FLAKY_SLOW_CALLS: u32 = 4;

const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Host {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Deserialize)]
pub struct HostParams {
    pub name: Option<String>,
    pub comment: Option<String>,
}

#[derive(Deserialize)]
pub struct HostEnvelope {
    pub host: HostParams,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
}

pub struct MockState {
    consumer_key: String,
    consumer_secret: String,
    hosts: RwLock<HashMap<u64, Host>>,
    next_id: AtomicU64,
    nonces: RwLock<HashSet<String>>,
    flaky_calls: AtomicU32,
}

pub type Db = Arc<MockState>;

pub fn app() -> Router {
    app_with_consumer(CONSUMER_KEY, CONSUMER_SECRET)
}

pub fn app_with_consumer(key: &str, secret: &str) -> Router {
    let state: Db = Arc::new(MockState {
        consumer_key: key.to_string(),
        consumer_secret: secret.to_string(),
        hosts: RwLock::new(HashMap::new()),
        next_id: AtomicU64::new(1),
        nonces: RwLock::new(HashSet::new()),
        flaky_calls: AtomicU32::new(0),
    });
    Router::new()
        .route("/api/status", get(status))
        .route("/api/slow", get(slow))
        .route("/api/flaky", get(flaky))
        .route("/api/respond/{code}", get(respond_with))
        .route("/api/v2/hosts", get(list_hosts).post(create_host))
        .route(
            "/api/v2/hosts/{id}",
            get(get_host).put(update_host).patch(update_host).delete(delete_host),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_oauth))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "mock server listening");
    }
    axum::serve(listener, app()).await
}

// ---------------------------------------------------------------------------
// OAuth verification
// ---------------------------------------------------------------------------

fn encode(value: &str) -> String {
    utf8_percent_encode(value, UNRESERVED).to_string()
}

fn decode(value: &str) -> String {
    percent_decode_str(value).decode_utf8_lossy().into_owned()
}

/// Parse `OAuth k="v", k2="v2"` into decoded pairs.
pub fn parse_authorization(value: &str) -> Option<Vec<(String, String)>> {
    let fields = value.strip_prefix("OAuth ")?;
    fields
        .split(',')
        .map(|field| {
            let (k, v) = field.trim().split_once('=')?;
            let v = v.strip_prefix('"')?.strip_suffix('"')?;
            Some((decode(k), decode(v)))
        })
        .collect()
}

/// Base64 HMAC-SHA1 over the RFC 5849 signature base string.
///
/// `params` are decoded query and `oauth_*` parameters, excluding
/// `oauth_signature`.
pub fn oauth_signature(
    method: &str,
    base_uri: &str,
    params: &[(String, String)],
    consumer_secret: &str,
) -> String {
    let mut encoded: Vec<(String, String)> =
        params.iter().map(|(k, v)| (encode(k), encode(v))).collect();
    encoded.sort();
    let normalized = encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let base = format!("{}&{}&{}", method, encode(base_uri), encode(&normalized));

    let key = format!("{}&", encode(consumer_secret));
    let mut mac =
        Hmac::<Sha1>::new_from_slice(key.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(base.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

fn unauthorized(reason: &str) -> Response {
    debug!(reason, "rejecting request");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": { "message": "Unable to authenticate user" } })),
    )
        .into_response()
}

async fn require_oauth(State(db): State<Db>, request: Request, next: Next) -> Response {
    let Some(auth) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return unauthorized("missing Authorization header");
    };
    let Some(oauth) = parse_authorization(auth) else {
        return unauthorized("malformed Authorization header");
    };
    let field = |name: &str| {
        oauth
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };

    if field("oauth_consumer_key").as_deref() != Some(db.consumer_key.as_str()) {
        return unauthorized("unknown consumer key");
    }
    if field("oauth_signature_method").as_deref() != Some("HMAC-SHA1") {
        return unauthorized("unsupported signature method");
    }
    let (Some(signature), Some(nonce)) = (field("oauth_signature"), field("oauth_nonce")) else {
        return unauthorized("missing signature or nonce");
    };

    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let base_uri = format!("http://{host}{}", request.uri().path());

    let mut params: Vec<(String, String)> = request
        .uri()
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode(k), decode(v)),
            None => (decode(pair), String::new()),
        })
        .collect();
    params.extend(oauth.iter().filter(|(k, _)| k != "oauth_signature").cloned());

    let expected = oauth_signature(
        request.method().as_str(),
        &base_uri,
        &params,
        &db.consumer_secret,
    );
    if expected != signature {
        return unauthorized("signature mismatch");
    }
    if !db.nonces.write().await.insert(nonce) {
        return unauthorized("nonce replayed");
    }

    next.run(request).await
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn full_messages(messages: &[&str]) -> Json<serde_json::Value> {
    Json(json!({ "error": { "full_messages": messages } }))
}

async fn status(headers: HeaderMap) -> Json<serde_json::Value> {
    let user = headers
        .get("foreman_user")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    Json(json!({ "result": "ok", "version": "3.9.0", "foreman_user": user }))
}

async fn slow() -> Json<serde_json::Value> {
    tokio::time::sleep(SLOW_DELAY).await;
    Json(json!({ "result": "ok" }))
}

async fn flaky(State(db): State<Db>) -> Json<serde_json::Value> {
    let call = db.flaky_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if call <= FLAKY_SLOW_CALLS {
        tokio::time::sleep(SLOW_DELAY).await;
    }
    Json(json!({ "result": "ok", "call": call }))
}

async fn respond_with(Path(code): Path<u16>) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (status, Json(json!({ "error": { "message": "requested status" } }))).into_response()
}

async fn list_hosts(
    State(db): State<Db>,
    Query(query): Query<ListQuery>,
) -> Json<serde_json::Value> {
    let hosts = db.hosts.read().await;
    let wanted = query
        .search
        .as_deref()
        .and_then(|s| s.strip_prefix("name="))
        .map(str::to_string);
    let mut results: Vec<Host> = hosts
        .values()
        .filter(|h| wanted.as_deref().map_or(true, |name| h.name == name))
        .cloned()
        .collect();
    results.sort_by_key(|h| h.id);
    Json(json!({ "search": query.search, "results": results }))
}

async fn create_host(
    State(db): State<Db>,
    Json(input): Json<HostEnvelope>,
) -> Result<(StatusCode, Json<Host>), (StatusCode, Json<serde_json::Value>)> {
    let name = input.host.name.unwrap_or_default();
    if name.trim().is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            full_messages(&["Name can't be blank", "Name is invalid"]),
        ));
    }
    let mut hosts = db.hosts.write().await;
    if hosts.values().any(|h| h.name == name) {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            full_messages(&["Name has already been taken"]),
        ));
    }
    let host = Host {
        id: db.next_id.fetch_add(1, Ordering::SeqCst),
        name,
        comment: input.host.comment,
    };
    hosts.insert(host.id, host.clone());
    Ok((StatusCode::CREATED, Json(host)))
}

async fn get_host(State(db): State<Db>, Path(id): Path<u64>) -> Result<Json<Host>, StatusCode> {
    let hosts = db.hosts.read().await;
    hosts.get(&id).cloned().map(Json).ok_or(StatusCode::NOT_FOUND)
}

async fn update_host(
    State(db): State<Db>,
    Path(id): Path<u64>,
    Json(input): Json<HostEnvelope>,
) -> Result<Json<Host>, StatusCode> {
    let mut hosts = db.hosts.write().await;
    let host = hosts.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    if let Some(name) = input.host.name {
        host.name = name;
    }
    if let Some(comment) = input.host.comment {
        host.comment = Some(comment);
    }
    Ok(Json(host.clone()))
}

async fn delete_host(State(db): State<Db>, Path(id): Path<u64>) -> Result<Json<Host>, StatusCode> {
    let mut hosts = db.hosts.write().await;
    hosts.remove(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}
