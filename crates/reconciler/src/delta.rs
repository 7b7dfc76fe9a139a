//! Delta builder: desired membership against observed assignments.
//!
//! Grants naming the same entitlement are merged first. For every
//! entitlement and every observed user the builder schedules at most one
//! operation:
//!
//! | holds entitlement | member of grant | operation |
//! |-------------------|-----------------|-----------|
//! | yes               | no              | remove    |
//! | no                | yes             | add       |
//! | otherwise         |                 | none      |
//!
//! Membership matches on any of the user's addresses. All operations for
//! one user land in a single [`UpdateRecord`], so the apply phase sends one
//! mutation per user no matter how many entitlements change.
//!
//! The observed users only ever come from the universe, so the builder never
//! touches anyone outside it.

use std::collections::HashMap;

use licsync_core::{Identity, ObservedUser, Operation, UpdateRecord};
use tracing::debug;

use crate::types::DesiredState;

/// Build the pending updates for `users` against `desired`.
///
/// Records come out in the order their user first needed a change, which is
/// entitlement order then user order. The result is deterministic for a given
/// input, so a dry run shows exactly what a live run would send.
#[must_use]
pub fn build_delta(users: &[ObservedUser], desired: &DesiredState) -> Vec<UpdateRecord> {
    let mut pending = PendingUpdates::default();

    for grant in desired.merged() {
        for user in users {
            let member = grant.includes_any(user.identities());
            let holds = user.holds(&grant.entitlement);
            let operation = match (holds, member) {
                (true, false) => Operation::remove(grant.entitlement.clone()),
                (false, true) => Operation::add(grant.entitlement.clone()),
                _ => continue,
            };
            debug!(
                user = %user.label(),
                mapping = %grant.mapping,
                operation = %operation,
                "Scheduling operation"
            );
            pending.schedule(user, operation);
        }
    }

    pending.into_records()
}

/// Records under construction, indexed by every address and remote id of
/// their user.
#[derive(Default)]
struct PendingUpdates {
    records: Vec<UpdateRecord>,
    by_address: HashMap<Identity, usize>,
    by_remote_id: HashMap<String, usize>,
}

impl PendingUpdates {
    fn schedule(&mut self, user: &ObservedUser, operation: Operation) {
        match self.position(user) {
            Some(index) => {
                if let Some(record) = self.records.get_mut(index) {
                    // A user looked up under two of its addresses arrives
                    // twice; the operation is scheduled once.
                    if !record.operations.contains(&operation) {
                        record.push(operation);
                    }
                }
            }
            None => {
                let index = self.records.len();
                self.by_remote_id.insert(user.remote_id.clone(), index);
                for email in user.identities() {
                    self.by_address.entry(email).or_insert(index);
                }
                self.records.push(UpdateRecord::new(user.clone(), operation));
            }
        }
    }

    fn position(&self, user: &ObservedUser) -> Option<usize> {
        self.by_remote_id.get(&user.remote_id).copied().or_else(|| {
            user.identities()
                .find_map(|email| self.by_address.get(&email).copied())
        })
    }

    fn into_records(self) -> Vec<UpdateRecord> {
        self.records
    }
}
