//! Seams between the reconciler and the outside world.
//!
//! The engine only talks to these traits; the HTTP client and the LDAP
//! gateway implement them, and tests substitute in-memory fakes.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{DirectoryResult, RemoteResult};
use crate::types::{Capacity, Entitlement, Identity, ObservedUser, UpdateRecord};

/// Snapshot of the remote client's call statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStats {
    /// Retries issued since the client was built.
    pub retries: u64,
    /// Calls currently holding a concurrency slot.
    pub in_flight: usize,
}

/// Calls against the remote service.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Fetch the record for `identity`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the service has no such user, `Fatal` otherwise.
    async fn lookup_user(&self, identity: &Identity) -> RemoteResult<ObservedUser>;

    /// Write the accumulated operations of one record as a single mutation.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`RemoteService::lookup_user`].
    async fn apply_update(&self, record: &UpdateRecord) -> RemoteResult<()>;

    /// Fetch unit counts for `entitlement`.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`RemoteService::lookup_user`].
    async fn get_capacity(&self, entitlement: &Entitlement) -> RemoteResult<Capacity>;

    /// Current call statistics.
    fn stats(&self) -> CallStats {
        CallStats::default()
    }
}

/// Resolves directory filters to member identities.
#[async_trait]
pub trait DirectoryGateway: Send + Sync {
    /// Resolve `filter` to the set of matching identities.
    ///
    /// A filter matching nothing yields an empty set, not an error.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::DirectoryError`] when the directory cannot be
    /// queried.
    async fn resolve_members(&self, filter: &str) -> DirectoryResult<BTreeSet<Identity>>;
}
