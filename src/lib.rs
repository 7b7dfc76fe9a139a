#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # licsync
//!
//! Command-line front end for the license reconciler: configuration loading,
//! flag handling and exit codes. The engine itself lives in
//! `licsync-reconciler`.

pub mod cli;
pub mod config;

pub use cli::{Cli, LogLevel, exit_code};
pub use config::{ConfigError, Limits, MappingEntry, Overrides, SyncConfig};

// Re-export the workspace crates for convenience
pub use licsync_core;
pub use licsync_directory;
pub use licsync_reconciler;
pub use licsync_remote;
