//! Client configuration supplied by the host.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Conventional location of the server's settings file holding the OAuth
/// consumer pair.
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/foreman/settings.yaml";

/// Connection and identity settings for a [`RestClient`](crate::RestClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the API, e.g. `https://foreman.example.com/api`.
    pub base_url: String,

    /// Name of the resource being managed; used in diagnostics.
    #[serde(default = "default_resource_name")]
    pub resource_name: String,

    /// Explicit OAuth consumer key. Falls back to the settings file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer_key: Option<String>,

    /// Explicit OAuth consumer secret. Falls back to the settings file.
    #[serde(default, skip_serializing)]
    pub consumer_secret: Option<String>,

    /// Per-attempt timeout. Written as (possibly fractional) seconds under
    /// `timeout_secs`.
    #[serde(rename = "timeout_secs", with = "seconds", default = "default_timeout")]
    pub timeout: Duration,

    /// PEM file with the CA certificate(s) used to verify the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_ca: Option<PathBuf>,

    /// Sent as the `foreman_user` header.
    #[serde(default = "default_effective_user")]
    pub effective_user: String,

    /// Fallback credential store.
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,
}

fn default_resource_name() -> String {
    "foreman".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(500)
}

mod seconds {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

fn default_effective_user() -> String {
    "admin".to_string()
}

fn default_settings_path() -> PathBuf {
    PathBuf::from(DEFAULT_SETTINGS_PATH)
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            resource_name: default_resource_name(),
            consumer_key: None,
            consumer_secret: None,
            timeout: default_timeout(),
            ssl_ca: None,
            effective_user: default_effective_user(),
            settings_path: default_settings_path(),
        }
    }

    /// Parse a YAML document and validate it.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Missing { field: "base_url" });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "timeout_secs",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn with_resource_name(mut self, name: impl Into<String>) -> Self {
        self.resource_name = name.into();
        self
    }

    #[must_use]
    pub fn with_consumer(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.consumer_key = Some(key.into());
        self.consumer_secret = Some(secret.into());
        self
    }

    /// Per-attempt timeout, kept at full precision.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_ssl_ca(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssl_ca = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_effective_user(mut self, user: impl Into<String>) -> Self {
        self.effective_user = user.into();
        self
    }

    #[must_use]
    pub fn with_settings_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = path.into();
        self
    }
}
