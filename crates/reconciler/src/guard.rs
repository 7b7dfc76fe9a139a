//! Safety checks that stop a run before anything is written.

use licsync_core::{Capacity, Entitlement};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Default ceiling on update records per run.
pub const DEFAULT_MAX_UPDATES: usize = 500;

/// Result of a capacity check that did not abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityVerdict {
    /// Enough free units.
    Within,
    /// Not enough free units, but over-subscription was allowed.
    Oversubscribed,
}

/// Capacity and change-count guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaGuard {
    allow_oversubscription: bool,
    max_changes: usize,
}

impl Default for QuotaGuard {
    fn default() -> Self {
        Self::new(false, DEFAULT_MAX_UPDATES)
    }
}

impl QuotaGuard {
    /// Create a guard.
    #[must_use]
    pub const fn new(allow_oversubscription: bool, max_changes: usize) -> Self {
        Self {
            allow_oversubscription,
            max_changes,
        }
    }

    /// Check that `desired` identities fit into the free units of
    /// `entitlement`.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` when they do not and over-subscription is off.
    pub fn check_capacity(
        &self,
        entitlement: &Entitlement,
        desired: usize,
        capacity: Capacity,
    ) -> Result<CapacityVerdict> {
        let available = capacity.available();
        let fits = u64::try_from(desired).is_ok_and(|wanted| wanted <= available);

        if fits {
            info!(
                entitlement = %entitlement,
                desired,
                available,
                total = capacity.total,
                "Capacity sufficient"
            );
            return Ok(CapacityVerdict::Within);
        }

        if self.allow_oversubscription {
            warn!(
                entitlement = %entitlement,
                desired,
                available,
                "Capacity exceeded, continuing because over-subscription is allowed"
            );
            return Ok(CapacityVerdict::Oversubscribed);
        }

        Err(Error::capacity_exceeded(entitlement.clone(), desired, available))
    }

    /// Check that `proposed` update records stay within the ceiling.
    ///
    /// # Errors
    ///
    /// `TooManyChanges` above the ceiling.
    pub fn check_change_count(&self, proposed: usize) -> Result<()> {
        if proposed > self.max_changes {
            return Err(Error::too_many_changes(proposed, self.max_changes));
        }
        Ok(())
    }
}
