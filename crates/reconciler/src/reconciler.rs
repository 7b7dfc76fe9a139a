//! Reconciler implementation.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use licsync_core::{
    DirectoryGateway, Entitlement, Identity, ObservedUser, RemoteService, UpdateRecord,
};
use tracing::{debug, error, info, warn};

use crate::delta::build_delta;
use crate::error::{Error, Result};
use crate::guard::{DEFAULT_MAX_UPDATES, QuotaGuard};
use crate::pool::{Slot, WorkerPool};
use crate::types::{ApplyReport, CapacityCheck, DesiredState, Phase, RunReport, SyncPlan};

/// Configuration for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Ceiling on update records per run.
    pub max_updates: usize,
    /// Continue when desired holders exceed free units.
    pub allow_oversubscription: bool,
    /// Stop after the threshold check without writing.
    pub dry_run: bool,
    /// Worker ceiling for the lookup and apply fan-outs.
    pub workers: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_updates: DEFAULT_MAX_UPDATES,
            allow_oversubscription: false,
            dry_run: false,
            workers: 10,
        }
    }
}

impl ReconcilerConfig {
    /// Check the values that would make a run meaningless.
    ///
    /// # Errors
    ///
    /// Returns an invalid config error for zero workers.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::invalid_config("workers must be at least 1"));
        }
        Ok(())
    }
}

/// One-shot reconciliation engine.
///
/// A run walks `Init → FetchUniverse → FetchGroups → CapacityCheck →
/// FetchObserved → Diff → ThresholdCheck → Apply → Done`; any failure moves
/// it to `Abort` and returns the error. Both guards run before the first
/// write.
pub struct Reconciler {
    remote: Arc<dyn RemoteService>,
    directory: Arc<dyn DirectoryGateway>,
    config: ReconcilerConfig,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        remote: Arc<dyn RemoteService>,
        directory: Arc<dyn DirectoryGateway>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            remote,
            directory,
            config,
        }
    }

    /// Run the plan once.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` or `TooManyChanges` when a guard trips,
    /// `LookupFailed` or `CapacityUnavailable` on a fatal remote failure
    /// before the apply phase, `ApplyAborted` when an update fails fatally,
    /// and `Directory` when a directory query fails.
    pub async fn run(&self, plan: &SyncPlan) -> Result<RunReport> {
        let mut run = RunState::new(self.config.dry_run);
        match self.drive(plan, &mut run).await {
            Ok(()) => {
                run.enter(Phase::Done);
                let report = run.finish(self.remote.stats());
                if report.converged() {
                    info!(elapsed_ms = report.elapsed_ms, "System converged");
                } else {
                    info!(
                        updates = report.records.len(),
                        adds = report.add_count(),
                        removes = report.remove_count(),
                        retries = report.stats.retries,
                        elapsed_ms = report.elapsed_ms,
                        dry_run = report.dry_run,
                        "Reconciliation complete"
                    );
                }
                Ok(report)
            }
            Err(err) => {
                let failed_in = run.report.phase();
                run.enter(Phase::Abort);
                if err.is_guard_abort() {
                    warn!(phase = %failed_in, error = %err, "Guard stopped the run before any write");
                } else {
                    error!(phase = %failed_in, error = %err, "Reconciliation aborted");
                }
                Err(err)
            }
        }
    }

    async fn drive(&self, plan: &SyncPlan, run: &mut RunState) -> Result<()> {
        let guard = QuotaGuard::new(self.config.allow_oversubscription, self.config.max_updates);

        run.enter(Phase::FetchUniverse);
        let universe = self.directory.resolve_members(&plan.universe_filter).await?;
        run.report.universe = universe.len();
        info!(universe = universe.len(), "Universe resolved");

        run.enter(Phase::FetchGroups);
        let desired = self.fetch_groups(plan).await?;

        run.enter(Phase::CapacityCheck);
        run.report.capacities = self.check_capacity(&desired, &guard).await?;

        run.enter(Phase::FetchObserved);
        let (users, missing) = self.fetch_observed(&universe).await?;
        run.report.observed = users.len();
        run.report.missing = missing;

        run.enter(Phase::Diff);
        let records = build_delta(&users, &desired);
        for record in &records {
            info!(update = %record.summary(), "Pending update");
        }
        run.report.records = records;

        run.enter(Phase::ThresholdCheck);
        guard.check_change_count(run.report.records.len())?;

        if self.config.dry_run {
            info!(
                updates = run.report.records.len(),
                "Dry run enabled, no updates will be executed"
            );
            return Ok(());
        }

        run.enter(Phase::Apply);
        let apply = self.apply(run.report.records.clone()).await;
        if apply.abort_reason.is_some() {
            return Err(Error::ApplyAborted(Box::new(apply)));
        }
        run.report.apply = Some(apply);
        Ok(())
    }

    /// Resolve every mapping's members, in configuration order.
    async fn fetch_groups(&self, plan: &SyncPlan) -> Result<DesiredState> {
        let mut desired = DesiredState::new();
        for mapping in &plan.mappings {
            let members = self.directory.resolve_members(&mapping.filter).await?;
            if members.is_empty() {
                warn!(
                    mapping = %mapping.name,
                    entitlement = %mapping.entitlement,
                    "Group has no members, every holder will lose the entitlement"
                );
            } else {
                info!(
                    mapping = %mapping.name,
                    entitlement = %mapping.entitlement,
                    members = members.len(),
                    "Group resolved"
                );
            }
            desired.add_grant(mapping, members);
        }
        Ok(desired)
    }

    /// Fetch capacity once per distinct entitlement and check the union of
    /// its desired holders against the free units.
    async fn check_capacity(
        &self,
        desired: &DesiredState,
        guard: &QuotaGuard,
    ) -> Result<BTreeMap<Entitlement, CapacityCheck>> {
        let mut capacities = BTreeMap::new();
        for (entitlement, members) in desired.members_by_entitlement() {
            let capacity = self
                .remote
                .get_capacity(&entitlement)
                .await
                .map_err(|err| Error::capacity_unavailable(entitlement.clone(), err.to_string()))?;
            let verdict = guard.check_capacity(&entitlement, members.len(), capacity)?;
            capacities.insert(
                entitlement,
                CapacityCheck {
                    capacity,
                    desired: members.len(),
                    verdict,
                },
            );
        }
        Ok(capacities)
    }

    /// Look up every universe identity through the worker pool.
    ///
    /// Unknown identities are reported, not fatal. A user reached under two
    /// of its addresses is kept once.
    async fn fetch_observed(
        &self,
        universe: &BTreeSet<Identity>,
    ) -> Result<(Vec<ObservedUser>, Vec<Identity>)> {
        let started = Instant::now();
        let identities: Vec<Identity> = universe.iter().cloned().collect();
        let remote = Arc::clone(&self.remote);
        let pool = WorkerPool::new(self.config.workers);

        let run = pool
            .run(identities.clone(), move |identity: Identity| {
                let remote = Arc::clone(&remote);
                async move { remote.lookup_user(&identity).await }
            })
            .await;

        if let Some((index, err)) = run.fatal {
            let identity = identities
                .get(index)
                .map_or_else(String::new, ToString::to_string);
            return Err(Error::lookup_failed(identity, err.to_string()));
        }

        let mut users = Vec::with_capacity(identities.len());
        let mut missing = Vec::new();
        let mut seen = HashSet::new();
        for (identity, slot) in identities.into_iter().zip(run.slots) {
            match slot {
                Slot::Done(user) => {
                    if seen.insert(user.remote_id.clone()) {
                        users.push(user);
                    } else {
                        debug!(identity = %identity, remote_id = %user.remote_id, "Duplicate lookup result");
                    }
                }
                Slot::Missing(_) => {
                    info!(identity = %identity, "No remote user for identity");
                    missing.push(identity);
                }
                Slot::Failed(_) | Slot::Skipped => {}
            }
        }

        let stats = self.remote.stats();
        info!(
            observed = users.len(),
            missing = missing.len(),
            retries = stats.retries,
            in_flight = stats.in_flight,
            elapsed_ms = elapsed_ms(started),
            "Lookups complete"
        );
        Ok((users, missing))
    }

    /// Send every record through the worker pool.
    async fn apply(&self, records: Vec<UpdateRecord>) -> ApplyReport {
        let started = Instant::now();
        let labels: Vec<String> = records.iter().map(UpdateRecord::label).collect();
        let remote = Arc::clone(&self.remote);
        let pool = WorkerPool::new(self.config.workers);

        let run = pool
            .run(records, move |record: UpdateRecord| {
                let remote = Arc::clone(&remote);
                async move { remote.apply_update(&record).await }
            })
            .await;

        let mut report = ApplyReport {
            abort_reason: run.fatal.map(|(_, err)| err.to_string()),
            ..ApplyReport::default()
        };
        for (label, slot) in labels.into_iter().zip(run.slots) {
            match slot {
                Slot::Done(()) => {
                    debug!(user = %label, "Update applied");
                    report.applied.push(label);
                }
                Slot::Missing(err) => {
                    warn!(user = %label, error = %err, "User vanished before update");
                    report.failed.push((label, err.to_string()));
                }
                Slot::Failed(err) => {
                    warn!(user = %label, error = %err, "Update failed");
                    report.failed.push((label, err.to_string()));
                }
                Slot::Skipped => report.not_attempted.push(label),
            }
        }

        let stats = self.remote.stats();
        info!(
            applied = report.applied.len(),
            failed = report.failed.len(),
            not_attempted = report.not_attempted.len(),
            retries = stats.retries,
            in_flight = stats.in_flight,
            elapsed_ms = elapsed_ms(started),
            "Apply complete"
        );
        report
    }
}

/// Report under construction plus phase timing.
struct RunState {
    report: RunReport,
    started: Instant,
    phase_started: Instant,
}

impl RunState {
    fn new(dry_run: bool) -> Self {
        let now = Instant::now();
        Self {
            report: RunReport::new(dry_run),
            started: now,
            phase_started: now,
        }
    }

    /// Close the current phase and enter `next`.
    fn enter(&mut self, next: Phase) {
        let leaving = self.report.phase();
        let spent = elapsed_ms(self.phase_started);
        self.report.timings_ms.insert(leaving, spent);
        self.phase_started = Instant::now();
        self.report.phases.push(next);
        info!(from = %leaving, to = %next, elapsed_ms = spent, "Phase transition");
    }

    fn finish(mut self, stats: licsync_core::CallStats) -> RunReport {
        self.report.stats = stats;
        self.report.elapsed_ms = elapsed_ms(self.started);
        self.report
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    remote: Option<Arc<dyn RemoteService>>,
    directory: Option<Arc<dyn DirectoryGateway>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            remote: None,
            directory: None,
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the remote service.
    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn RemoteService>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Set the directory gateway.
    #[must_use]
    pub fn with_directory(mut self, directory: Arc<dyn DirectoryGateway>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the update ceiling.
    #[must_use]
    pub const fn max_updates(mut self, max: usize) -> Self {
        self.config.max_updates = max;
        self
    }

    /// Allow or forbid over-subscription.
    #[must_use]
    pub const fn allow_oversubscription(mut self, allow: bool) -> Self {
        self.config.allow_oversubscription = allow;
        self
    }

    /// Enable/disable dry run.
    #[must_use]
    pub const fn dry_run(mut self, enabled: bool) -> Self {
        self.config.dry_run = enabled;
        self
    }

    /// Set the worker ceiling.
    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    ///
    /// Returns an invalid config error when a seam is missing or the
    /// configuration does not validate.
    pub fn build(self) -> Result<Reconciler> {
        let remote = self
            .remote
            .ok_or_else(|| Error::invalid_config("Remote service is required"))?;
        let directory = self
            .directory
            .ok_or_else(|| Error::invalid_config("Directory gateway is required"))?;
        self.config.validate()?;

        Ok(Reconciler::new(remote, directory, self.config))
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.max_updates, 500);
        assert_eq!(config.workers, 10);
        assert!(!config.dry_run);
        assert!(!config.allow_oversubscription);
    }

    #[test]
    fn test_builder_requires_seams() {
        let result = ReconcilerBuilder::new().dry_run(true).build();
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_zero_workers_is_invalid() {
        let config = ReconcilerConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_run_state_records_phase_trail() {
        let mut run = RunState::new(false);
        run.enter(Phase::FetchUniverse);
        run.enter(Phase::FetchGroups);
        let report = run.finish(licsync_core::CallStats::default());

        assert_eq!(
            report.phases,
            vec![Phase::Init, Phase::FetchUniverse, Phase::FetchGroups]
        );
        assert!(report.timings_ms.contains_key(&Phase::Init));
        assert!(report.timings_ms.contains_key(&Phase::FetchUniverse));
    }
}
