//! # licsync - one-shot license reconciliation
//!
//! ## Run sequence
//!
//! 1. **Configuration** - load `licsync.toml`, apply flags, validate
//! 2. **Remote client** - resolve the API token, build the HTTP client
//! 3. **Directory** - connect and bind to LDAP
//! 4. **Reconcile** - universe, groups, capacity, lookups, diff, guards, apply
//! 5. **Report** - human summary or JSON on stdout
//!
//! ## Exit codes
//!
//! `0` on success (dry runs included), `2` when the capacity guard stops the
//! run, `3` when the change-count guard does, `1` for anything else.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use licsync::{Cli, LogLevel, SyncConfig, exit_code};
use licsync_directory::LdapDirectory;
use licsync_reconciler::{ApplyReport, Error as RunError, ReconcilerBuilder, RunReport};
use licsync_remote::RemoteClient;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(RunError::ApplyAborted(report)) = err.downcast_ref::<RunError>() {
                eprintln!("{}", partial_apply(report));
            }
            eprintln!("error: {err:#}");
            exit_code(&err)
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = SyncConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?
        .with_overrides(cli.overrides());
    config.validate()?;

    let plan = config.plan();
    info!(
        mappings = plan.mappings.len(),
        entitlements = plan.entitlements().len(),
        dry_run = cli.dry_run,
        max_updates = config.limits.max_updates,
        concurrency = config.remote.max_concurrent,
        "licsync starting"
    );

    let remote = Arc::new(
        RemoteClient::new(config.remote.clone()).context("Failed to build the remote client")?,
    );
    let directory = Arc::new(
        LdapDirectory::connect(config.directory.clone())
            .await
            .context("Failed to connect to the directory")?,
    );

    let reconciler = ReconcilerBuilder::new()
        .with_remote(remote)
        .with_directory(Arc::clone(&directory) as Arc<dyn licsync_core::DirectoryGateway>)
        .with_config(config.reconciler_config(cli.dry_run))
        .build()?;

    let outcome = reconciler.run(&plan).await;

    drop(reconciler);
    close_directory(directory).await;

    let report = outcome?;
    print_report(&report, cli.json)
}

/// Unbind from the directory once the engine has released it.
async fn close_directory(directory: Arc<LdapDirectory>) {
    match Arc::try_unwrap(directory) {
        Ok(directory) => {
            if let Err(err) = directory.close().await {
                warn!(error = %err, "Directory unbind failed");
            }
        }
        Err(_) => warn!("Directory still in use, skipping unbind"),
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        let text =
            serde_json::to_string_pretty(report).context("Failed to serialize the run report")?;
        println!("{text}");
    } else {
        println!("{}", report.summary());
    }
    Ok(())
}

fn partial_apply(report: &ApplyReport) -> String {
    let mut lines = vec!["Apply stopped part-way; no rollback was attempted.".to_string()];
    lines.extend(report.applied.iter().map(|user| format!("  applied        {user}")));
    lines.extend(
        report
            .failed
            .iter()
            .map(|(user, reason)| format!("  failed         {user}: {reason}")),
    );
    lines.extend(
        report
            .not_attempted
            .iter()
            .map(|user| format!("  not attempted  {user}")),
    );
    lines.join("\n")
}

/// Initialize tracing: `--log` wins over `RUST_LOG`, which wins over `warn`.
fn init_tracing(level: Option<LogLevel>) {
    let filter = level.map_or_else(
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        |level| EnvFilter::new(level.as_str()),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
