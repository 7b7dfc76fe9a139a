//! Error types for building the remote client.
//!
//! Per-call failures use [`licsync_core::RemoteError`]; this type only covers
//! setting the client up.

use thiserror::Error;

/// Result type for remote client setup.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while configuring the remote client.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// HTTP client could not be built.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl Error {
    /// Create a config error.
    pub fn config_error(reason: impl Into<String>) -> Self {
        Self::ConfigError {
            reason: reason.into(),
        }
    }
}
