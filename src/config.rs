//! `licsync.toml` loading, command-line overrides and validation.

use std::path::{Path, PathBuf};

use licsync_core::GroupMapping;
use licsync_directory::{LdapConfig, nested_group_filter};
use licsync_reconciler::{DEFAULT_MAX_UPDATES, ReconcilerConfig, SyncPlan};
use licsync_remote::RemoteConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for configuration handling.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    /// Create an invalid configuration error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// Safety limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Ceiling on users updated per run.
    #[serde(default = "default_max_updates")]
    pub max_updates: usize,

    /// Continue when a group wants more units than are free.
    #[serde(default)]
    pub allow_oversubscription: bool,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_updates: default_max_updates(),
            allow_oversubscription: false,
        }
    }
}

/// One `[[mapping]]` table: a group (or raw filter) and its entitlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    /// Remote license id granted to members.
    pub entitlement: String,

    /// Group CN, expanded to a nested-membership filter under `base_dn`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Raw directory filter, used as is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Full configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub remote: RemoteConfig,

    pub directory: LdapConfig,

    #[serde(default)]
    pub limits: Limits,

    #[serde(default, rename = "mapping")]
    pub mappings: Vec<MappingEntry>,
}

/// Values given on the command line that win over the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overrides {
    pub allow_oversubscription: bool,
    pub max_updates: Option<usize>,
    pub concurrency: Option<usize>,
}

impl SyncConfig {
    /// Read and parse a configuration file.
    ///
    /// # Errors
    ///
    /// Returns a read error when the file cannot be opened and a parse error
    /// for malformed TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parse a configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns a parse error for malformed TOML or missing required keys.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply command-line overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if overrides.allow_oversubscription {
            self.limits.allow_oversubscription = true;
        }
        if let Some(max) = overrides.max_updates {
            self.limits.max_updates = max;
        }
        if let Some(concurrency) = overrides.concurrency {
            self.remote.max_concurrent = concurrency;
        }
        self
    }

    /// Check the configuration as a whole.
    ///
    /// # Errors
    ///
    /// Returns an invalid configuration error naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.mappings.is_empty() {
            return Err(ConfigError::invalid("at least one [[mapping]] is required"));
        }
        for (index, mapping) in self.mappings.iter().enumerate() {
            if mapping.entitlement.trim().is_empty() {
                return Err(ConfigError::invalid(format!(
                    "mapping #{} has an empty entitlement",
                    index + 1
                )));
            }
            if mapping.group.is_some() == mapping.filter.is_some() {
                return Err(ConfigError::invalid(format!(
                    "mapping #{} for '{}' needs exactly one of `group` or `filter`",
                    index + 1,
                    mapping.entitlement
                )));
            }
        }
        self.remote
            .validate()
            .map_err(|err| ConfigError::invalid(format!("[remote] {err}")))?;
        self.directory
            .validate()
            .map_err(|err| ConfigError::invalid(format!("[directory] {err}")))?;
        Ok(())
    }

    /// Resolve the mappings into directory filters.
    #[must_use]
    pub fn plan(&self) -> SyncPlan {
        let mappings = self
            .mappings
            .iter()
            .map(|entry| {
                let (name, filter) = match (&entry.group, &entry.filter) {
                    (Some(group), _) => (
                        group.clone(),
                        nested_group_filter(group, &self.directory.base_dn),
                    ),
                    (None, Some(filter)) => (filter.clone(), filter.clone()),
                    (None, None) => (entry.entitlement.clone(), String::new()),
                };
                GroupMapping::new(name, filter, entry.entitlement.as_str())
            })
            .collect();
        SyncPlan::new(self.directory.universe_filter.clone(), mappings)
    }

    /// Engine settings derived from the limits and the concurrency ceiling.
    #[must_use]
    pub fn reconciler_config(&self, dry_run: bool) -> ReconcilerConfig {
        ReconcilerConfig {
            max_updates: self.limits.max_updates,
            allow_oversubscription: self.limits.allow_oversubscription,
            dry_run,
            workers: self.remote.max_concurrent,
        }
    }
}

const fn default_max_updates() -> usize {
    DEFAULT_MAX_UPDATES
}
