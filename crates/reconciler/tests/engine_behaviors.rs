//! Behavior tests for a full reconciliation run against in-memory seams.

// Integration tests allow unwrap/panic for assertions
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use licsync_core::{
    Capacity, Entitlement, GroupMapping, Identity, ObservedUser, RemoteError,
    RemoteResult, RemoteService, UpdateRecord,
};
use licsync_directory::InMemoryDirectory;
use licsync_reconciler::{
    CapacityVerdict, Error, Phase, ReconcilerBuilder, RunReport, SyncPlan,
};

const UNIVERSE: &str = "(objectClass=user)";
const SALES: &str = "(memberOf=cn=sales)";
const SUPPORT: &str = "(memberOf=cn=support)";

/// Remote service backed by a map, counting every call.
#[derive(Default)]
struct FakeRemote {
    users: HashMap<Identity, ObservedUser>,
    capacities: HashMap<Entitlement, Capacity>,
    fail_lookup: Option<Identity>,
    fail_apply: Option<Identity>,
    panic_apply: Option<Identity>,
    lookups: AtomicUsize,
    applies: AtomicUsize,
    applied: Mutex<Vec<UpdateRecord>>,
}

impl FakeRemote {
    fn with_user(mut self, id: &str, emails: &[&str], held: &[&str]) -> Self {
        let user = ObservedUser::new(
            id,
            emails.iter().map(|e| Identity::new(e)),
            held.iter().map(|h| Entitlement::new(*h)),
        );
        for email in user.identities() {
            self.users.insert(email, user.clone());
        }
        self
    }

    fn with_capacity(mut self, entitlement: &str, total: u64, consumed: u64) -> Self {
        self.capacities
            .insert(Entitlement::new(entitlement), Capacity::new(total, consumed));
        self
    }

    fn failing_lookup(mut self, address: &str) -> Self {
        self.fail_lookup = Some(Identity::new(address));
        self
    }

    fn failing_apply(mut self, address: &str) -> Self {
        self.fail_apply = Some(Identity::new(address));
        self
    }

    fn panicking_apply(mut self, address: &str) -> Self {
        self.panic_apply = Some(Identity::new(address));
        self
    }

    fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn applies(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }

    fn applied_summaries(&self) -> Vec<String> {
        let mut summaries: Vec<String> = self
            .applied
            .lock()
            .unwrap()
            .iter()
            .map(UpdateRecord::summary)
            .collect();
        summaries.sort();
        summaries
    }
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn lookup_user(&self, identity: &Identity) -> RemoteResult<ObservedUser> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookup.as_ref() == Some(identity) {
            return Err(RemoteError::fatal("401 Unauthorized"));
        }
        self.users
            .get(identity)
            .cloned()
            .ok_or_else(|| RemoteError::not_found(identity.as_str()))
    }

    async fn apply_update(&self, record: &UpdateRecord) -> RemoteResult<()> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        if let Some(failing) = &self.fail_apply {
            if record.matches(failing) {
                return Err(RemoteError::fatal("gave up after 20 attempts: 503"));
            }
        }
        if let Some(crashing) = &self.panic_apply {
            assert!(!record.matches(crashing), "client crashed mid-update");
        }
        self.applied.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn get_capacity(&self, entitlement: &Entitlement) -> RemoteResult<Capacity> {
        self.capacities
            .get(entitlement)
            .copied()
            .ok_or_else(|| RemoteError::fatal(format!("unknown license {entitlement}")))
    }
}

fn plan(mappings: &[(&str, &str)]) -> SyncPlan {
    SyncPlan::new(
        UNIVERSE,
        mappings
            .iter()
            .map(|(filter, entitlement)| GroupMapping::new(*filter, *filter, *entitlement))
            .collect(),
    )
}

/// Universe {A, B, C}; sales = {A, B} wants X.
fn abc_directory() -> InMemoryDirectory {
    InMemoryDirectory::new()
        .with_filter(UNIVERSE, ["a@x.io", "b@x.io", "c@x.io"])
        .with_filter(SALES, ["a@x.io", "b@x.io"])
}

fn abc_remote() -> FakeRemote {
    FakeRemote::default()
        .with_user("u-a", &["a@x.io"], &["X"])
        .with_user("u-b", &["b@x.io"], &[])
        .with_user("u-c", &["c@x.io"], &[])
        .with_capacity("X", 10, 1)
}

async fn run(
    remote: Arc<FakeRemote>,
    directory: InMemoryDirectory,
    plan: &SyncPlan,
    configure: impl FnOnce(ReconcilerBuilder) -> ReconcilerBuilder,
) -> Result<RunReport, Error> {
    let reconciler = configure(
        ReconcilerBuilder::new()
            .with_remote(remote)
            .with_directory(Arc::new(directory))
            .workers(4),
    )
    .build()?;
    reconciler.run(plan).await
}

fn summaries(report: &RunReport) -> Vec<String> {
    let mut summaries: Vec<String> = report.records.iter().map(UpdateRecord::summary).collect();
    summaries.sort();
    summaries
}

#[tokio::test]
async fn given_member_without_entitlement_when_run_then_only_that_member_is_added() {
    // Given: A holds X, B and C do not; sales = {A, B}
    let remote = Arc::new(abc_remote());

    // When
    let report = run(Arc::clone(&remote), abc_directory(), &plan(&[(SALES, "X")]), |b| b)
        .await
        .unwrap();

    // Then: exactly one record, B add X
    assert_eq!(summaries(&report), vec!["b@x.io: add X"]);
    assert_eq!(remote.applies(), 1);
    assert_eq!(remote.applied_summaries(), vec!["b@x.io: add X"]);
    assert_eq!(report.phase(), Phase::Done);
    assert!(report.apply.as_ref().unwrap().all_succeeded());
}

#[tokio::test]
async fn given_holder_outside_group_when_run_then_add_and_remove_are_separate_records() {
    let remote = Arc::new(
        FakeRemote::default()
            .with_user("u-a", &["a@x.io"], &["X"])
            .with_user("u-b", &["b@x.io"], &[])
            .with_user("u-c", &["c@x.io"], &["X"])
            .with_capacity("X", 10, 2),
    );

    let report = run(Arc::clone(&remote), abc_directory(), &plan(&[(SALES, "X")]), |b| b)
        .await
        .unwrap();

    assert_eq!(summaries(&report), vec!["b@x.io: add X", "c@x.io: remove X"]);
    assert_eq!(remote.applies(), 2);
}

#[tokio::test]
async fn given_converged_state_when_run_again_then_nothing_is_scheduled() {
    let remote = Arc::new(
        FakeRemote::default()
            .with_user("u-a", &["a@x.io"], &["X"])
            .with_user("u-b", &["b@x.io"], &["X"])
            .with_user("u-c", &["c@x.io"], &[])
            .with_capacity("X", 10, 2),
    );

    let report = run(Arc::clone(&remote), abc_directory(), &plan(&[(SALES, "X")]), |b| b)
        .await
        .unwrap();

    assert!(report.converged());
    assert_eq!(remote.applies(), 0);
}

#[tokio::test]
async fn given_user_in_two_mappings_when_run_then_one_record_carries_both_operations() {
    let directory = abc_directory().with_filter(SUPPORT, ["b@x.io"]);
    let remote = Arc::new(abc_remote().with_capacity("Y", 10, 0));

    let report = run(
        Arc::clone(&remote),
        directory,
        &plan(&[(SALES, "X"), (SUPPORT, "Y")]),
        |b| b,
    )
    .await
    .unwrap();

    assert_eq!(summaries(&report), vec!["b@x.io: add X, add Y"]);
    assert_eq!(remote.applies(), 1);
}

#[tokio::test]
async fn given_empty_group_when_run_then_every_holder_loses_the_entitlement() {
    let directory = InMemoryDirectory::new()
        .with_filter(UNIVERSE, ["a@x.io", "b@x.io", "c@x.io"])
        .with_filter(SALES, Vec::<&str>::new());
    let remote = Arc::new(
        FakeRemote::default()
            .with_user("u-a", &["a@x.io"], &["X"])
            .with_user("u-b", &["b@x.io"], &["X", "Y"])
            .with_user("u-c", &["c@x.io"], &[])
            .with_capacity("X", 10, 2),
    );

    let report = run(Arc::clone(&remote), directory, &plan(&[(SALES, "X")]), |b| b)
        .await
        .unwrap();

    assert_eq!(summaries(&report), vec!["a@x.io: remove X", "b@x.io: remove X"]);
    assert_eq!(report.add_count(), 0);
}

#[tokio::test]
async fn given_group_larger_than_free_units_when_run_then_aborts_before_any_lookup() {
    // Given: two members want X but only one unit is free
    let remote = Arc::new(abc_remote().with_capacity("X", 10, 9));

    let result = run(Arc::clone(&remote), abc_directory(), &plan(&[(SALES, "X")]), |b| b).await;

    match result {
        Err(Error::CapacityExceeded {
            entitlement,
            desired,
            available,
        }) => {
            assert_eq!(entitlement, Entitlement::new("X"));
            assert_eq!(desired, 2);
            assert_eq!(available, 1);
        }
        other => panic!("expected CapacityExceeded, got {other:?}"),
    }
    assert_eq!(remote.lookups(), 0, "capacity abort must not wait on lookups");
    assert_eq!(remote.applies(), 0);
}

#[tokio::test]
async fn given_oversubscription_allowed_when_run_then_updates_proceed() {
    let remote = Arc::new(abc_remote().with_capacity("X", 10, 10));

    let report = run(Arc::clone(&remote), abc_directory(), &plan(&[(SALES, "X")]), |b| {
        b.allow_oversubscription(true)
    })
    .await
    .unwrap();

    assert_eq!(summaries(&report), vec!["b@x.io: add X"]);
    assert_eq!(remote.applies(), 1);
    let check = report.capacities[&Entitlement::new("X")];
    assert_eq!(check.verdict, CapacityVerdict::Oversubscribed);
    assert_eq!(check.desired, 2);
    assert_eq!(report.oversubscribed().count(), 1);
}

#[tokio::test]
async fn given_more_changes_than_allowed_when_run_then_nothing_is_applied() {
    let remote = Arc::new(
        FakeRemote::default()
            .with_user("u-a", &["a@x.io"], &[])
            .with_user("u-b", &["b@x.io"], &[])
            .with_user("u-c", &["c@x.io"], &["X"])
            .with_capacity("X", 10, 1),
    );

    let result = run(Arc::clone(&remote), abc_directory(), &plan(&[(SALES, "X")]), |b| {
        b.max_updates(2)
    })
    .await;

    assert!(matches!(
        result,
        Err(Error::TooManyChanges {
            proposed: 3,
            max: 2
        })
    ));
    assert_eq!(remote.applies(), 0);
}

#[tokio::test]
async fn given_dry_run_when_run_then_same_records_and_zero_applies() {
    let dry_remote = Arc::new(abc_remote());
    let live_remote = Arc::new(abc_remote());
    let plan = plan(&[(SALES, "X")]);

    let dry = run(Arc::clone(&dry_remote), abc_directory(), &plan, |b| b.dry_run(true))
        .await
        .unwrap();
    let live = run(Arc::clone(&live_remote), abc_directory(), &plan, |b| b)
        .await
        .unwrap();

    assert_eq!(dry.records, live.records);
    assert_eq!(dry_remote.applies(), 0);
    assert_eq!(live_remote.applies(), 1);
    assert!(dry.apply.is_none());
    assert!(!dry.phases.contains(&Phase::Apply));
    assert_eq!(dry.phase(), Phase::Done);
    assert!(dry.summary().starts_with("DRY RUN"));
}

#[tokio::test]
async fn given_identity_unknown_remotely_when_run_then_it_is_reported_missing() {
    let directory = abc_directory().with_filter(UNIVERSE, ["a@x.io", "b@x.io", "ghost@x.io"]);
    let remote = Arc::new(abc_remote());

    let report = run(Arc::clone(&remote), directory, &plan(&[(SALES, "X")]), |b| b)
        .await
        .unwrap();

    assert_eq!(report.missing, vec![Identity::new("ghost@x.io")]);
    assert_eq!(report.observed, 2);
    assert_eq!(summaries(&report), vec!["b@x.io: add X"]);
}

#[tokio::test]
async fn given_user_with_two_addresses_in_universe_when_run_then_one_update() {
    let directory = InMemoryDirectory::new()
        .with_filter(UNIVERSE, ["alice@x.io", "a.smith@x.io"])
        .with_filter(SALES, ["a.smith@x.io"]);
    let remote = Arc::new(
        FakeRemote::default()
            .with_user("u-a", &["alice@x.io", "a.smith@x.io"], &[])
            .with_capacity("X", 5, 0),
    );

    let report = run(Arc::clone(&remote), directory, &plan(&[(SALES, "X")]), |b| b)
        .await
        .unwrap();

    assert_eq!(report.observed, 1);
    assert_eq!(summaries(&report), vec!["alice@x.io: add X"]);
    assert_eq!(remote.applies(), 1);
}

#[tokio::test]
async fn given_fatal_lookup_when_run_then_aborts_without_applying() {
    let remote = Arc::new(abc_remote().failing_lookup("b@x.io"));

    let result = run(Arc::clone(&remote), abc_directory(), &plan(&[(SALES, "X")]), |b| b).await;

    match result {
        Err(Error::LookupFailed { identity, reason }) => {
            assert_eq!(identity, "b@x.io");
            assert!(reason.contains("401"));
        }
        other => panic!("expected LookupFailed, got {other:?}"),
    }
    assert_eq!(remote.applies(), 0);
}

#[tokio::test]
async fn given_fatal_apply_when_run_then_report_splits_applied_and_not_attempted() {
    // Given: five users need X, the second update fails fatally, one worker
    let directory = InMemoryDirectory::new()
        .with_filter(UNIVERSE, ["a@x.io", "b@x.io", "c@x.io", "d@x.io", "e@x.io"])
        .with_filter(SALES, ["a@x.io", "b@x.io", "c@x.io", "d@x.io", "e@x.io"]);
    let remote = Arc::new(
        ["a", "b", "c", "d", "e"]
            .iter()
            .fold(FakeRemote::default(), |remote, name| {
                remote.with_user(&format!("u-{name}"), &[&format!("{name}@x.io")], &[])
            })
            .with_capacity("X", 10, 0)
            .failing_apply("b@x.io"),
    );

    let result = run(Arc::clone(&remote), directory, &plan(&[(SALES, "X")]), |b| {
        b.workers(1)
    })
    .await;

    let report = match result {
        Err(Error::ApplyAborted(report)) => report,
        other => panic!("expected ApplyAborted, got {other:?}"),
    };
    assert_eq!(report.applied, vec!["a@x.io"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "b@x.io");
    assert_eq!(report.not_attempted, vec!["c@x.io", "d@x.io", "e@x.io"]);
    assert_eq!(remote.applies(), 2);
}

#[tokio::test]
async fn given_apply_worker_crashes_when_run_then_apply_is_aborted() {
    let remote = Arc::new(
        abc_remote()
            .with_capacity("X", 10, 0)
            .panicking_apply("b@x.io"),
    );

    let result = run(Arc::clone(&remote), abc_directory(), &plan(&[(SALES, "X")]), |b| b).await;

    let report = match result {
        Err(Error::ApplyAborted(report)) => report,
        other => panic!("expected ApplyAborted, got {other:?}"),
    };
    assert!(report.applied.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "b@x.io");
    assert!(report.failed[0].1.contains("worker failed"));
}

#[tokio::test]
async fn given_unknown_entitlement_when_run_then_capacity_is_unavailable() {
    let remote = Arc::new(FakeRemote::default().with_user("u-a", &["a@x.io"], &[]));

    let result = run(Arc::clone(&remote), abc_directory(), &plan(&[(SALES, "Z")]), |b| b).await;

    assert!(matches!(result, Err(Error::CapacityUnavailable { .. })));
    assert_eq!(remote.lookups(), 0);
}

#[tokio::test]
async fn given_two_mappings_for_one_entitlement_when_run_then_capacity_counts_the_union() {
    // sales = {A, B}, support = {B, C}: three distinct holders of X
    let directory = abc_directory().with_filter(SUPPORT, ["b@x.io", "c@x.io"]);
    let remote = Arc::new(abc_remote().with_capacity("X", 10, 8));

    let result = run(
        Arc::clone(&remote),
        directory,
        &plan(&[(SALES, "X"), (SUPPORT, "X")]),
        |b| b,
    )
    .await;

    assert!(matches!(
        result,
        Err(Error::CapacityExceeded {
            desired: 3,
            available: 2,
            ..
        })
    ));
}
