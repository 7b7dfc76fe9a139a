//! Core types for the reconciler.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use licsync_core::{CallStats, Capacity, Entitlement, GroupMapping, Identity, UpdateRecord};
use serde::{Deserialize, Serialize};

use crate::guard::CapacityVerdict;

/// What a run reconciles: the universe of eligible identities and the
/// group-to-entitlement mappings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    /// Directory filter selecting every identity the run may touch.
    pub universe_filter: String,
    /// Group mappings, in configuration order.
    pub mappings: Vec<GroupMapping>,
}

impl SyncPlan {
    /// Create a plan.
    pub fn new(universe_filter: impl Into<String>, mappings: Vec<GroupMapping>) -> Self {
        Self {
            universe_filter: universe_filter.into(),
            mappings,
        }
    }

    /// Distinct entitlements named by the mappings, sorted.
    #[must_use]
    pub fn entitlements(&self) -> BTreeSet<Entitlement> {
        self.mappings
            .iter()
            .map(|mapping| mapping.entitlement.clone())
            .collect()
    }
}

/// Resolved members of one mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredGrant {
    /// Mapping label, for logs.
    pub mapping: String,
    /// Entitlement the members should hold.
    pub entitlement: Entitlement,
    /// Identities the directory returned for the mapping.
    pub members: BTreeSet<Identity>,
}

impl DesiredGrant {
    /// Check whether any of `emails` is a member.
    pub fn includes_any(&self, emails: impl IntoIterator<Item = Identity>) -> bool {
        emails.into_iter().any(|email| self.members.contains(&email))
    }
}

/// Desired state declaration.
///
/// One grant per mapping, in configuration order. Two mappings naming the
/// same entitlement stay separate grants; a user is a member of the
/// entitlement when any of its grants includes them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    grants: Vec<DesiredGrant>,
}

impl DesiredState {
    /// Create a new empty desired state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the resolved members of a mapping.
    pub fn add_grant(&mut self, mapping: &GroupMapping, members: BTreeSet<Identity>) {
        self.grants.push(DesiredGrant {
            mapping: mapping.name.clone(),
            entitlement: mapping.entitlement.clone(),
            members,
        });
    }

    /// Grants merged per entitlement, in order of first appearance.
    #[must_use]
    pub fn merged(&self) -> Vec<DesiredGrant> {
        let mut merged: Vec<DesiredGrant> = Vec::new();
        for grant in &self.grants {
            match merged
                .iter_mut()
                .find(|existing| existing.entitlement == grant.entitlement)
            {
                Some(existing) => {
                    existing.mapping = format!("{}+{}", existing.mapping, grant.mapping);
                    existing.members.extend(grant.members.iter().cloned());
                }
                None => merged.push(grant.clone()),
            }
        }
        merged
    }

    /// Distinct entitlements with the union of their members.
    #[must_use]
    pub fn members_by_entitlement(&self) -> BTreeMap<Entitlement, BTreeSet<Identity>> {
        self.grants
            .iter()
            .fold(BTreeMap::new(), |mut acc, grant| {
                acc.entry(grant.entitlement.clone())
                    .or_insert_with(BTreeSet::new)
                    .extend(grant.members.iter().cloned());
                acc
            })
    }
}

/// Stage of a run. A run walks these in order and ends in `Done` or `Abort`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    FetchUniverse,
    FetchGroups,
    CapacityCheck,
    FetchObserved,
    Diff,
    ThresholdCheck,
    Apply,
    Done,
    Abort,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::FetchUniverse => "fetch_universe",
            Self::FetchGroups => "fetch_groups",
            Self::CapacityCheck => "capacity_check",
            Self::FetchObserved => "fetch_observed",
            Self::Diff => "diff",
            Self::ThresholdCheck => "threshold_check",
            Self::Apply => "apply",
            Self::Done => "done",
            Self::Abort => "abort",
        };
        f.write_str(name)
    }
}

/// Outcome of the apply phase, one entry per update record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    /// Users whose update was confirmed.
    pub applied: Vec<String>,
    /// Users whose update failed, with the reason.
    pub failed: Vec<(String, String)>,
    /// Users whose update was never sent, or was cancelled before the
    /// remote confirmed it, because the run stopped.
    pub not_attempted: Vec<String>,
    /// The failure that stopped the run, if any.
    pub abort_reason: Option<String>,
}

impl ApplyReport {
    /// Check if every update was confirmed.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.not_attempted.is_empty()
    }
}

/// Capacity of one entitlement and how the desired holders fit into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityCheck {
    #[serde(flatten)]
    pub capacity: Capacity,
    /// Distinct identities that should hold the entitlement.
    pub desired: usize,
    pub verdict: CapacityVerdict,
}

/// Summary of one reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Wall-clock start of the run.
    pub started_at: DateTime<Utc>,
    /// Whether the apply phase was skipped.
    pub dry_run: bool,
    /// Phases in the order they were entered.
    pub phases: Vec<Phase>,
    /// Size of the identity universe.
    pub universe: usize,
    /// Users found on the remote service.
    pub observed: usize,
    /// Universe identities without a remote record.
    pub missing: Vec<Identity>,
    /// Capacity check of every mapped entitlement.
    pub capacities: BTreeMap<Entitlement, CapacityCheck>,
    /// Pending updates, one per user.
    pub records: Vec<UpdateRecord>,
    /// Apply outcome; `None` on a dry run.
    pub apply: Option<ApplyReport>,
    /// Remote call statistics at the end of the run.
    pub stats: CallStats,
    /// Milliseconds spent per phase.
    pub timings_ms: BTreeMap<Phase, u64>,
    /// Total run time in milliseconds.
    pub elapsed_ms: u64,
}

impl RunReport {
    /// Create an empty report for a run starting now.
    #[must_use]
    pub fn new(dry_run: bool) -> Self {
        Self {
            started_at: Utc::now(),
            dry_run,
            phases: vec![Phase::Init],
            universe: 0,
            observed: 0,
            missing: Vec::new(),
            capacities: BTreeMap::new(),
            records: Vec::new(),
            apply: None,
            stats: CallStats::default(),
            timings_ms: BTreeMap::new(),
            elapsed_ms: 0,
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phases.last().copied().unwrap_or(Phase::Init)
    }

    /// Check if nothing needed to change.
    #[must_use]
    pub fn converged(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of add operations across all records.
    #[must_use]
    pub fn add_count(&self) -> usize {
        self.records.iter().map(|record| record.adds().count()).sum()
    }

    /// Entitlements the run assigns beyond their free units.
    pub fn oversubscribed(&self) -> impl Iterator<Item = &Entitlement> {
        self.capacities
            .iter()
            .filter(|(_, check)| check.verdict == CapacityVerdict::Oversubscribed)
            .map(|(entitlement, _)| entitlement)
    }

    /// Number of remove operations across all records.
    #[must_use]
    pub fn remove_count(&self) -> usize {
        self.records.iter().map(|record| record.removes().count()).sum()
    }

    /// Human-readable multi-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        if self.dry_run {
            lines.push("DRY RUN: no changes were written".to_string());
        }
        lines.push(format!(
            "universe {} | observed {} | missing {} | updates {} (+{} / -{})",
            self.universe,
            self.observed,
            self.missing.len(),
            self.records.len(),
            self.add_count(),
            self.remove_count()
        ));
        lines.extend(self.capacities.iter().map(|(entitlement, check)| {
            let line = format!(
                "  {entitlement}: {} of {} units used, {} free, {} wanted",
                check.capacity.consumed,
                check.capacity.total,
                check.capacity.available(),
                check.desired
            );
            match check.verdict {
                CapacityVerdict::Within => line,
                CapacityVerdict::Oversubscribed => format!("{line} (OVERSUBSCRIBED)"),
            }
        }));
        let oversubscribed = self.oversubscribed().join(", ");
        if !oversubscribed.is_empty() {
            lines.push(format!("over-subscription allowed for: {oversubscribed}"));
        }
        lines.extend(
            self.records
                .iter()
                .map(|record| format!("  {}", record.summary())),
        );
        if let Some(apply) = &self.apply {
            lines.push(format!(
                "applied {} | failed {} | not attempted {}",
                apply.applied.len(),
                apply.failed.len(),
                apply.not_attempted.len()
            ));
            if !apply.all_succeeded() {
                lines.extend(
                    apply
                        .failed
                        .iter()
                        .map(|(user, reason)| format!("  failed {user}: {reason}")),
                );
            }
        }
        lines.push(format!(
            "phases {} | retries {} | {} ms",
            self.phases.iter().join(" > "),
            self.stats.retries,
            self.elapsed_ms
        ));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use licsync_core::{ObservedUser, Operation};

    fn mapping(name: &str, entitlement: &str) -> GroupMapping {
        GroupMapping::new(name, format!("(cn={name})"), entitlement)
    }

    fn members(addresses: &[&str]) -> BTreeSet<Identity> {
        addresses.iter().map(|a| Identity::new(a)).collect()
    }

    #[test]
    fn test_desired_state_unions_members_per_entitlement() {
        let mut desired = DesiredState::new();
        desired.add_grant(&mapping("sales", "meet"), members(&["a@x.io", "b@x.io"]));
        desired.add_grant(&mapping("support", "meet"), members(&["b@x.io", "c@x.io"]));
        desired.add_grant(&mapping("eng", "msg"), members(&["d@x.io"]));

        let by_entitlement = desired.members_by_entitlement();
        assert_eq!(by_entitlement.len(), 2);
        assert_eq!(by_entitlement.get(&Entitlement::new("meet")).map(BTreeSet::len), Some(3));

        let merged = desired.merged();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].mapping, "sales+support");
        assert_eq!(merged[1].entitlement, Entitlement::new("msg"));
    }

    #[test]
    fn test_plan_entitlements_are_distinct() {
        let plan = SyncPlan::new(
            "(objectClass=user)",
            vec![mapping("sales", "meet"), mapping("support", "meet")],
        );
        assert_eq!(plan.entitlements().len(), 1);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::CapacityCheck.to_string(), "capacity_check");
        assert_eq!(Phase::FetchObserved.to_string(), "fetch_observed");
    }

    #[test]
    fn test_summary_flags_oversubscribed_entitlements() -> Result<(), Box<dyn std::error::Error>> {
        let mut report = RunReport::new(false);
        report.capacities.insert(
            Entitlement::new("meet"),
            CapacityCheck {
                capacity: Capacity::new(10, 9),
                desired: 3,
                verdict: CapacityVerdict::Oversubscribed,
            },
        );
        report.capacities.insert(
            Entitlement::new("msg"),
            CapacityCheck {
                capacity: Capacity::new(10, 0),
                desired: 3,
                verdict: CapacityVerdict::Within,
            },
        );

        assert_eq!(report.oversubscribed().collect::<Vec<_>>(), vec![&Entitlement::new("meet")]);
        let summary = report.summary();
        assert!(summary.contains("meet: 9 of 10 units used, 1 free, 3 wanted (OVERSUBSCRIBED)"));
        assert!(summary.contains("over-subscription allowed for: meet"));

        let json = serde_json::to_value(&report)?;
        assert_eq!(json["capacities"]["meet"]["total"], 10);
        assert_eq!(json["capacities"]["meet"]["verdict"], "oversubscribed");
        Ok(())
    }

    #[test]
    fn test_summary_marks_dry_run() {
        let mut report = RunReport::new(true);
        let user = ObservedUser::new("u-1", [Identity::new("a@x.io")], Vec::new());
        report
            .records
            .push(UpdateRecord::new(user, Operation::add(Entitlement::new("meet"))));

        let summary = report.summary();
        assert!(summary.starts_with("DRY RUN"));
        assert!(summary.contains("a@x.io: add meet"));
        assert_eq!(report.add_count(), 1);
        assert!(!report.converged());
    }

    #[test]
    fn test_report_serializes_to_json() -> Result<(), Box<dyn std::error::Error>> {
        let mut report = RunReport::new(false);
        report.phases.push(Phase::Done);
        report.timings_ms.insert(Phase::Diff, 3);

        let json = serde_json::to_value(&report)?;
        assert_eq!(json["phases"], serde_json::json!(["init", "done"]));
        assert_eq!(json["timings_ms"]["diff"], 3);
        Ok(())
    }
}
