#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # licsync-core
//!
//! Data model, error taxonomy and service traits shared by the licsync
//! crates.
//!
//! - [`types`]: identities, entitlements, observed users and update records
//! - [`error`]: `NotFound` / `Transient` / `Fatal` remote failures and
//!   directory failures
//! - [`service`]: the [`RemoteService`] and [`DirectoryGateway`] seams

pub mod error;
pub mod service;
pub mod types;

pub use error::{DirectoryError, DirectoryResult, RemoteError, RemoteResult};
pub use service::{CallStats, DirectoryGateway, RemoteService};
pub use types::{
    Capacity, Entitlement, GroupMapping, Identity, ObservedUser, Operation, OperationKind,
    UpdateRecord,
};
