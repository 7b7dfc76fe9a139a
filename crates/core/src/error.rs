//! Error taxonomy shared by every licsync crate.
//!
//! Remote calls fail in one of three ways and callers branch on the kind,
//! never on the message text.

use thiserror::Error;

/// Result type for calls against the remote service.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Result type for directory queries.
pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// Failure of a single call against the remote service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The identity has no record on the remote service.
    #[error("no remote record for '{identity}'")]
    NotFound { identity: String },

    /// Rate limiting, connection reset, timeout or cancellation. Retryable.
    #[error("transient failure: {reason}")]
    Transient { reason: String },

    /// Protocol or authorization failure, or a transient failure that
    /// exhausted its retries.
    #[error("fatal failure: {reason}")]
    Fatal { reason: String },
}

impl RemoteError {
    /// Create a not found error.
    pub fn not_found(identity: impl Into<String>) -> Self {
        Self::NotFound {
            identity: identity.into(),
        }
    }

    /// Create a transient error.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    /// Create a fatal error.
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    /// Check if this error may succeed when the call is repeated.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Check if this error only means the identity is unknown remotely.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Escalate a transient error to fatal, keeping its reason.
    #[must_use]
    pub fn escalate(self, attempts: u32) -> Self {
        match self {
            Self::Transient { reason } => Self::Fatal {
                reason: format!("gave up after {attempts} attempts: {reason}"),
            },
            other => other,
        }
    }
}

/// Failure while querying the directory.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    /// Could not reach the directory server.
    #[error("directory connection failed: {reason}")]
    Connection { reason: String },

    /// The server refused the bind credentials.
    #[error("directory bind failed for '{bind_dn}': {reason}")]
    Bind { bind_dn: String, reason: String },

    /// The search itself failed.
    #[error("directory search '{filter}' failed: {reason}")]
    Search { filter: String, reason: String },

    /// The gateway configuration is unusable.
    #[error("invalid directory configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl DirectoryError {
    /// Create a connection error.
    pub fn connection(reason: impl Into<String>) -> Self {
        Self::Connection {
            reason: reason.into(),
        }
    }

    /// Create a bind error.
    pub fn bind(bind_dn: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Bind {
            bind_dn: bind_dn.into(),
            reason: reason.into(),
        }
    }

    /// Create a search error.
    pub fn search(filter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Search {
            filter: filter.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}
