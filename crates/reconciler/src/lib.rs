//! One-shot reconciliation of license assignments against directory groups.
//!
//! A run follows the usual reconcile pattern:
//!
//! - **Desired State**: members of each mapped directory group
//! - **Observed State**: remote users found for the identity universe
//! - **Diff**: one [`licsync_core::UpdateRecord`] per user that must change
//! - **Apply**: every record written through a bounded worker pool
//!
//! Two guards sit in front of the apply phase. The capacity check aborts
//! when a group wants more units than are free, and the threshold check
//! aborts when the diff touches more users than allowed. Neither issues a
//! write.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use licsync_reconciler::{ReconcilerBuilder, SyncPlan};
//!
//! let reconciler = ReconcilerBuilder::new()
//!     .with_remote(Arc::new(client))
//!     .with_directory(Arc::new(directory))
//!     .dry_run(true)
//!     .build()?;
//!
//! let report = reconciler.run(&SyncPlan::new(universe_filter, mappings)).await?;
//! println!("{}", report.summary());
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod delta;
pub mod error;
pub mod guard;
pub mod pool;
pub mod reconciler;
pub mod types;

// Re-export main types
pub use delta::build_delta;
pub use error::{Error, Result};
pub use guard::{CapacityVerdict, DEFAULT_MAX_UPDATES, QuotaGuard};
pub use pool::{PoolRun, Slot, WorkerPool};
pub use reconciler::{Reconciler, ReconcilerBuilder, ReconcilerConfig};
pub use types::{
    ApplyReport, CapacityCheck, DesiredGrant, DesiredState, Phase, RunReport, SyncPlan,
};
