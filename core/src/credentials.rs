//! OAuth consumer credential resolution.
//!
//! # Design
//! Explicitly configured values always win. Any field left unset is taken
//! from a [`CredentialStore`], which is read at most once per resolution.
//! Caching across requests is the client's job (see
//! [`RestClient`](crate::RestClient)), so a resolver can be called directly in
//! tests without hidden state.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::CredentialError;

/// The consumer key/secret pair requests are signed with.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub consumer_key: String,
    pub consumer_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .finish()
    }
}

/// Entries read from a credential store. Either field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StoredCredentials {
    #[serde(default, alias = ":oauth_consumer_key")]
    pub oauth_consumer_key: Option<String>,
    #[serde(default, alias = ":oauth_consumer_secret")]
    pub oauth_consumer_secret: Option<String>,
}

/// Fallback source of consumer credentials.
pub trait CredentialStore: Send + Sync {
    /// Returns `None` when the store is missing or cannot be parsed.
    fn load(&self) -> Option<StoredCredentials>;
}

/// YAML settings file on disk, e.g. `/etc/foreman/settings.yaml`.
///
/// Accepts both plain keys (`oauth_consumer_key:`) and the Ruby-symbol keys
/// (`:oauth_consumer_key:`) the server writes.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for SettingsFile {
    fn load(&self) -> Option<StoredCredentials> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Cannot read settings file");
                return None;
            }
        };
        match serde_yaml::from_str(&content) {
            Ok(stored) => Some(stored),
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Cannot parse settings file");
                None
            }
        }
    }
}

/// Resolves [`Credentials`] from explicit values plus a fallback store.
pub struct CredentialResolver {
    resource: String,
    explicit_key: Option<String>,
    explicit_secret: Option<String>,
    store: Box<dyn CredentialStore>,
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("resource", &self.resource)
            .field("explicit_key", &self.explicit_key)
            .field("explicit_secret", &self.explicit_secret.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl CredentialResolver {
    pub fn new(
        resource: impl Into<String>,
        explicit_key: Option<String>,
        explicit_secret: Option<String>,
        store: Box<dyn CredentialStore>,
    ) -> Self {
        Self {
            resource: resource.into(),
            explicit_key: non_empty(explicit_key),
            explicit_secret: non_empty(explicit_secret),
            store,
        }
    }

    /// Determine the consumer pair. The store is only consulted when an
    /// explicit value is missing.
    pub fn resolve(&self) -> Result<Credentials, CredentialError> {
        if let (Some(key), Some(secret)) = (&self.explicit_key, &self.explicit_secret) {
            return Ok(Credentials {
                consumer_key: key.clone(),
                consumer_secret: secret.clone(),
            });
        }

        let stored = self.store.load().unwrap_or_default();

        let consumer_key = self
            .explicit_key
            .clone()
            .or_else(|| non_empty(stored.oauth_consumer_key))
            .ok_or_else(|| self.unavailable("consumer key"))?;
        let consumer_secret = self
            .explicit_secret
            .clone()
            .or_else(|| non_empty(stored.oauth_consumer_secret))
            .ok_or_else(|| self.unavailable("consumer secret"))?;

        Ok(Credentials {
            consumer_key,
            consumer_secret,
        })
    }

    fn unavailable(&self, field: &'static str) -> CredentialError {
        CredentialError::Unavailable {
            resource: self.resource.clone(),
            field,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
