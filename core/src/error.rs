//! Error types for the signed request client.
//!
//! # Design
//! Only transport-level problems are errors. A response with a 4xx/5xx
//! status is returned as an `HttpResponse` and classified by the caller (see
//! [`classify`](crate::classify)). Of the transport problems, only
//! `TransportError::Timeout` is retried; everything else surfaces at once.

use thiserror::Error;

/// Signing credentials could not be determined.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// Neither an explicit value nor a usable fallback entry exists.
    #[error("Resource {resource} cannot be managed: No OAuth {field} available")]
    Unavailable { resource: String, field: &'static str },
}

/// Failure reported by a [`Transport`](crate::transport::Transport) for a
/// single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The attempt did not complete within the configured timeout.
    #[error("timed out: {reason}")]
    Timeout { reason: String },

    /// Connection refused, DNS failure, TLS failure, malformed response, ...
    #[error("{reason}")]
    Failure { reason: String },
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Unrecoverable failure of a logical request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Credentials(#[from] CredentialError),

    /// Every attempt timed out.
    #[error("Timeout calling API at {uri} after {attempts} attempts")]
    Timeout { uri: String, attempts: u32 },

    /// A non-timeout transport failure. Never retried.
    #[error("Exception {source} in {method} request to: {uri}")]
    Transport {
        method: String,
        uri: String,
        #[source]
        source: TransportError,
    },

    /// Base URL and path do not form a valid URL.
    #[error("invalid request URI {uri}: {source}")]
    InvalidUrl {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    /// The path carries its own query or fragment, or resolves outside the
    /// base URL.
    #[error("invalid request path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },
}

impl RequestError {
    /// The target URI of the failed request, when one was built.
    pub fn uri(&self) -> Option<&str> {
        match self {
            RequestError::Credentials(_) | RequestError::InvalidPath { .. } => None,
            RequestError::Timeout { uri, .. }
            | RequestError::Transport { uri, .. }
            | RequestError::InvalidUrl { uri, .. } => Some(uri),
        }
    }
}

/// Client configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {field} must not be empty")]
    Missing { field: &'static str },

    #[error("invalid configuration: {field} {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },

    #[error("failed to read CA certificate {path}: {reason}")]
    CaCertificate { path: String, reason: String },
}
