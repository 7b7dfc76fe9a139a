//! Connection parameters for the LDAP gateway.

use std::fmt;
use std::time::Duration;

use licsync_core::{DirectoryError, DirectoryResult};
use serde::{Deserialize, Serialize};

use crate::filter::DEFAULT_UNIVERSE_FILTER;

/// Configuration for [`crate::LdapDirectory`].
#[derive(Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    /// Server URL, e.g. `ldap://dc01.corp.example:3268`.
    pub url: String,

    /// DN (or UPN) to bind as.
    pub bind_dn: String,

    /// Environment variable holding the bind password.
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Inline bind password. Takes precedence over `password_env`.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Search base; also the parent of the groups named in mappings.
    pub base_dn: String,

    /// Attribute holding the mail addresses used as identities.
    #[serde(default = "default_mail_attribute")]
    pub mail_attribute: String,

    /// Filter selecting every user under management.
    #[serde(default = "default_universe_filter")]
    pub universe_filter: String,

    /// Timeout for connecting and for each operation.
    #[serde(rename = "timeout_secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Upgrade the connection with STARTTLS.
    #[serde(default)]
    pub starttls: bool,
}

impl LdapConfig {
    /// Create a config with defaults for everything but the essentials.
    pub fn new(
        url: impl Into<String>,
        bind_dn: impl Into<String>,
        base_dn: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            bind_dn: bind_dn.into(),
            password_env: default_password_env(),
            password: None,
            base_dn: base_dn.into(),
            mail_attribute: default_mail_attribute(),
            universe_filter: default_universe_filter(),
            timeout_secs: default_timeout_secs(),
            starttls: false,
        }
    }

    /// Operation timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolve the bind password from the inline value or the environment.
    ///
    /// # Errors
    ///
    /// Returns an invalid config error when neither source provides one.
    pub fn resolve_password(&self) -> DirectoryResult<String> {
        if let Some(password) = self.password.as_ref() {
            return Ok(password.clone());
        }
        std::env::var(&self.password_env).map_err(|_| {
            DirectoryError::invalid_config(format!(
                "no bind password: set `password` or the {} environment variable",
                self.password_env
            ))
        })
    }

    /// Check the configuration before connecting.
    ///
    /// # Errors
    ///
    /// Returns an invalid config error for an unsupported URL scheme or an
    /// empty base DN or mail attribute.
    pub fn validate(&self) -> DirectoryResult<()> {
        if !(self.url.starts_with("ldap://") || self.url.starts_with("ldaps://")) {
            return Err(DirectoryError::invalid_config(format!(
                "url '{}' must start with ldap:// or ldaps://",
                self.url
            )));
        }
        if self.starttls && self.url.starts_with("ldaps://") {
            return Err(DirectoryError::invalid_config(
                "cannot use both ldaps:// and STARTTLS",
            ));
        }
        if self.base_dn.trim().is_empty() {
            return Err(DirectoryError::invalid_config("base_dn must not be empty"));
        }
        if self.mail_attribute.trim().is_empty() {
            return Err(DirectoryError::invalid_config(
                "mail_attribute must not be empty",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for LdapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdapConfig")
            .field("url", &self.url)
            .field("bind_dn", &self.bind_dn)
            .field("password_env", &self.password_env)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("base_dn", &self.base_dn)
            .field("mail_attribute", &self.mail_attribute)
            .field("universe_filter", &self.universe_filter)
            .field("timeout_secs", &self.timeout_secs)
            .field("starttls", &self.starttls)
            .finish()
    }
}

fn default_password_env() -> String {
    "LICSYNC_LDAP_PASSWORD".to_string()
}

fn default_mail_attribute() -> String {
    "mail".to_string()
}

fn default_universe_filter() -> String {
    DEFAULT_UNIVERSE_FILTER.to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}
