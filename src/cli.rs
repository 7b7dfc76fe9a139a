//! CLI definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use crate::config::Overrides;

/// licsync - reconcile license assignments with directory groups
#[derive(Parser, Debug)]
#[command(name = "licsync")]
#[command(version)]
#[command(about = "Grant and revoke remote-service licenses to match directory group membership")]
#[command(
    long_about = "licsync reads group membership from an LDAP directory, compares it with the \
                  licenses users hold on the remote service, and applies the difference. Capacity \
                  and change-count guards stop the run before anything is written."
)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "licsync.toml")]
    pub config: PathBuf,

    /// Compute and report the changes without applying them
    #[arg(short = 'n', long, default_value_t = false)]
    pub dry_run: bool,

    /// Proceed even when a group wants more licenses than are free
    #[arg(long, default_value_t = false)]
    pub allow_oversubscription: bool,

    /// Abort when more users than this would be updated
    #[arg(long, value_name = "N")]
    pub max_updates: Option<usize>,

    /// Ceiling on concurrent remote calls
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Log verbosity; overrides RUST_LOG
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log: Option<LogLevel>,

    /// Print the run report as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl Cli {
    /// Values that override the configuration file.
    #[must_use]
    pub const fn overrides(&self) -> Overrides {
        Overrides {
            allow_oversubscription: self.allow_oversubscription,
            max_updates: self.max_updates,
            concurrency: self.concurrency,
        }
    }
}

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Process exit status for a failed run.
///
/// The capacity guard exits with 2 and the change-count guard with 3 so
/// that schedulers can tell a deliberate stop from a crash. Everything else
/// exits with 1.
#[must_use]
pub fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<licsync_reconciler::Error>() {
        Some(licsync_reconciler::Error::CapacityExceeded { .. }) => ExitCode::from(2),
        Some(licsync_reconciler::Error::TooManyChanges { .. }) => ExitCode::from(3),
        _ => ExitCode::FAILURE,
    }
}
