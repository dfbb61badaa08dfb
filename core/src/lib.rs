//! Signed REST request client for the Foreman API.
//!
//! # Overview
//! Given a method, path, query parameters and an optional JSON body,
//! [`RestClient`] builds the target URI below a configured base URL, signs
//! the request with two-legged OAuth 1.0a, sends it, and retries on timeout.
//! Completed responses are returned whatever their status;
//! [`classify`](classify::classify) turns them into a success/failure verdict
//! with a human-readable message.
//!
//! # Design
//! - Blocking and synchronous. One call occupies the caller's thread for its
//!   full duration, retries included.
//! - Only transport timeouts are retried (5 attempts in total). HTTP error
//!   statuses are data, not errors.
//! - Consumer credentials come from the configuration or, failing that, the
//!   server's settings file, and are resolved once per client.
//! - The network sits behind the [`Transport`] trait; requests and responses
//!   are plain data ([`HttpRequest`], [`HttpResponse`]).

pub mod classify;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod http;
pub mod oauth;
pub mod transport;

pub use classify::{classify, error_message, is_success, Outcome};
pub use client::{RestClient, MAX_ATTEMPTS};
pub use config::ClientConfig;
pub use credentials::{CredentialResolver, CredentialStore, Credentials, SettingsFile};
pub use error::{ConfigError, CredentialError, RequestError, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use transport::{Transport, UreqTransport};
