//! Configuration for the remote client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Configuration for [`crate::RemoteClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// API base, e.g. `https://webexapis.com/v1/`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Inline bearer token. Takes precedence over `token_env`.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Timeout for a single request.
    #[serde(rename = "timeout_secs", with = "duration_secs", default = "default_timeout")]
    pub timeout: Duration,

    /// Ceiling on calls in flight, across all call types.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Retry policy for transient failures.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_env: default_token_env(),
            token: None,
            timeout: default_timeout(),
            max_concurrent: default_max_concurrent(),
            retry: RetryPolicy::default(),
        }
    }
}

impl RemoteConfig {
    /// Create a config for the given API base.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the bearer token.
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the concurrency ceiling.
    #[must_use]
    pub const fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Resolve the bearer token from the inline value or the environment.
    ///
    /// # Errors
    ///
    /// Returns a config error when neither source provides a token.
    pub fn resolve_token(&self) -> Result<String> {
        if let Some(token) = self.token.as_ref().filter(|t| !t.is_empty()) {
            return Ok(token.clone());
        }
        std::env::var(&self.token_env)
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::config_error(format!(
                    "no API token: set `token` or the {} environment variable",
                    self.token_env
                ))
            })
    }

    /// Parse the API base.
    ///
    /// # Errors
    ///
    /// Returns a URL parse error, or a config error for a URL that cannot
    /// carry a path (`mailto:` and the like).
    pub fn api_base(&self) -> Result<Url> {
        let url = Url::parse(&self.base_url)?;
        if url.cannot_be_a_base() {
            return Err(Error::config_error(format!(
                "base_url '{url}' cannot be used as an API base"
            )));
        }
        Ok(url)
    }

    /// Check the values that would make the client unusable.
    ///
    /// # Errors
    ///
    /// Returns a config error for a zero concurrency ceiling, zero attempts
    /// or an unusable base URL.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(Error::config_error("max_concurrent must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config_error("retry.max_attempts must be at least 1"));
        }
        self.api_base().map(|_| ())
    }
}

fn default_base_url() -> String {
    "https://webexapis.com/v1/".to_string()
}

fn default_token_env() -> String {
    "LICSYNC_TOKEN".to_string()
}

const fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_max_concurrent() -> usize {
    10
}

/// Serialization helper for Duration as seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
