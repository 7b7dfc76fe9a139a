//! Error types for the reconciler crate.

use std::fmt;

use licsync_core::{DirectoryError, Entitlement};

use crate::types::ApplyReport;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a run aborts.
#[derive(Debug, Clone)]
pub enum Error {
    /// More identities want an entitlement than it has free units.
    CapacityExceeded {
        entitlement: Entitlement,
        desired: usize,
        available: u64,
    },
    /// The diff is larger than the configured ceiling.
    TooManyChanges { proposed: usize, max: usize },
    /// A user lookup failed fatally.
    LookupFailed { identity: String, reason: String },
    /// The capacity of an entitlement could not be read.
    CapacityUnavailable {
        entitlement: Entitlement,
        reason: String,
    },
    /// An update failed fatally; the report says what was already written.
    ApplyAborted(Box<ApplyReport>),
    /// A directory query failed.
    Directory(DirectoryError),
    /// Invalid configuration.
    InvalidConfig { reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityExceeded {
                entitlement,
                desired,
                available,
            } => {
                write!(
                    f,
                    "entitlement '{entitlement}' is wanted by {desired} users but only \
                     {available} units are free; buy more units or pass \
                     --allow-oversubscription"
                )
            }
            Self::TooManyChanges { proposed, max } => {
                write!(
                    f,
                    "{proposed} users would be updated, above the limit of {max}; \
                     raise --max-updates to proceed"
                )
            }
            Self::LookupFailed { identity, reason } => {
                write!(f, "lookup of '{identity}' failed: {reason}")
            }
            Self::CapacityUnavailable {
                entitlement,
                reason,
            } => {
                write!(f, "capacity of '{entitlement}' unavailable: {reason}")
            }
            Self::ApplyAborted(report) => {
                write!(
                    f,
                    "apply aborted after {} updates ({} failed, {} not attempted): {}",
                    report.applied.len(),
                    report.failed.len(),
                    report.not_attempted.len(),
                    report.abort_reason.as_deref().unwrap_or("unknown failure")
                )
            }
            Self::Directory(err) => write!(f, "{err}"),
            Self::InvalidConfig { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Directory(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DirectoryError> for Error {
    fn from(err: DirectoryError) -> Self {
        Self::Directory(err)
    }
}

impl Error {
    /// Create a capacity exceeded error.
    pub fn capacity_exceeded(entitlement: Entitlement, desired: usize, available: u64) -> Self {
        Self::CapacityExceeded {
            entitlement,
            desired,
            available,
        }
    }

    /// Create a too many changes error.
    #[must_use]
    pub const fn too_many_changes(proposed: usize, max: usize) -> Self {
        Self::TooManyChanges { proposed, max }
    }

    /// Create a lookup failed error.
    pub fn lookup_failed(identity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LookupFailed {
            identity: identity.into(),
            reason: reason.into(),
        }
    }

    /// Create a capacity unavailable error.
    pub fn capacity_unavailable(entitlement: Entitlement, reason: impl Into<String>) -> Self {
        Self::CapacityUnavailable {
            entitlement,
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Check if a safety guard stopped the run before any write.
    #[must_use]
    pub const fn is_guard_abort(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. } | Self::TooManyChanges { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_message_names_numbers_and_override() {
        let err = Error::capacity_exceeded(Entitlement::new("meet"), 12, 4);
        let text = err.to_string();
        assert!(text.contains("meet"));
        assert!(text.contains("12"));
        assert!(text.contains('4'));
        assert!(text.contains("--allow-oversubscription"));
        assert!(err.is_guard_abort());
    }

    #[test]
    fn test_too_many_changes_message() {
        let err = Error::too_many_changes(501, 500);
        assert!(err.to_string().contains("501"));
        assert!(err.to_string().contains("--max-updates"));
        assert!(err.is_guard_abort());
    }

    #[test]
    fn test_directory_error_converts() {
        let err: Error = DirectoryError::connection("refused").into();
        assert!(matches!(err, Error::Directory(_)));
        assert!(!err.is_guard_abort());
        assert!(err.to_string().contains("refused"));
    }
}
