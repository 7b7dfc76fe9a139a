//! Domain model for one reconciliation run.
//!
//! Every value here is built fresh at the start of a run and dropped at the
//! end; nothing is persisted between runs.

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Stable external key (an email address) correlating directory entries
/// with remote-service users.
///
/// Addresses are trimmed and lowercased on construction so that
/// `Alice@Example.com` in the directory matches `alice@example.com` remotely.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Create a normalized identity.
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(address.as_ref().trim().to_lowercase())
    }

    /// Borrow the normalized address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque identifier of an assignable remote resource (a license).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entitlement(String);

impl Entitlement {
    /// Create an entitlement from its remote identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the remote identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Entitlement {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Entitlement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unit counts of an entitlement, fetched once per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    /// Units purchased.
    pub total: u64,
    /// Units currently assigned.
    pub consumed: u64,
}

impl Capacity {
    /// Create a capacity.
    #[must_use]
    pub const fn new(total: u64, consumed: u64) -> Self {
        Self { total, consumed }
    }

    /// Units still free. Zero when the entitlement is already over-subscribed.
    #[must_use]
    pub const fn available(&self) -> u64 {
        self.total.saturating_sub(self.consumed)
    }
}

/// Configuration pairing a directory filter with the entitlement its
/// members should hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMapping {
    /// Human label used in logs (usually the group name).
    pub name: String,
    /// Directory filter resolving the group's members.
    pub filter: String,
    /// Entitlement implied by membership.
    pub entitlement: Entitlement,
}

impl GroupMapping {
    /// Create a mapping.
    pub fn new(
        name: impl Into<String>,
        filter: impl Into<String>,
        entitlement: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            filter: filter.into(),
            entitlement: Entitlement::new(entitlement),
        }
    }
}

/// Remote-service record for one user.
///
/// Fields the reconciler does not interpret are kept in `extra` so that the
/// record can be written back as a full replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedUser {
    /// Remote identifier used to address updates.
    #[serde(rename = "id")]
    pub remote_id: String,
    /// All addresses known for the user, as the remote stores them; the
    /// first one is primary. Compare through [`Self::identities`].
    #[serde(default)]
    pub emails: Vec<String>,
    /// Entitlements currently assigned.
    #[serde(rename = "licenses", default)]
    pub entitlements: Vec<Entitlement>,
    /// Remaining remote attributes, passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ObservedUser {
    /// Create a user record without extra attributes.
    pub fn new(
        remote_id: impl Into<String>,
        emails: impl IntoIterator<Item = impl Into<String>>,
        entitlements: impl IntoIterator<Item = Entitlement>,
    ) -> Self {
        Self {
            remote_id: remote_id.into(),
            emails: emails.into_iter().map(Into::into).collect(),
            entitlements: entitlements.into_iter().collect(),
            extra: serde_json::Map::new(),
        }
    }

    /// Primary address, if the remote record carries any.
    #[must_use]
    pub fn primary(&self) -> Option<&str> {
        self.emails.first().map(String::as_str)
    }

    /// Normalized view of every address.
    pub fn identities(&self) -> impl Iterator<Item = Identity> + '_ {
        self.emails.iter().map(Identity::new)
    }

    /// Label for logs: the primary address, or the remote id.
    #[must_use]
    pub fn label(&self) -> String {
        self.primary()
            .map_or_else(|| self.remote_id.clone(), str::to_owned)
    }

    /// Check whether any of the user's addresses equals `identity`.
    #[must_use]
    pub fn answers_to(&self, identity: &Identity) -> bool {
        self.identities().any(|email| &email == identity)
    }

    /// Check whether the user currently holds `entitlement`.
    #[must_use]
    pub fn holds(&self, entitlement: &Entitlement) -> bool {
        self.entitlements.contains(entitlement)
    }
}

/// Direction of a pending change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Grant the entitlement.
    Add,
    /// Revoke the entitlement.
    Remove,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

/// One add or remove of one entitlement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    pub entitlement: Entitlement,
}

impl Operation {
    /// Create an add operation.
    #[must_use]
    pub const fn add(entitlement: Entitlement) -> Self {
        Self {
            kind: OperationKind::Add,
            entitlement,
        }
    }

    /// Create a remove operation.
    #[must_use]
    pub const fn remove(entitlement: Entitlement) -> Self {
        Self {
            kind: OperationKind::Remove,
            entitlement,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.entitlement)
    }
}

/// Pending mutation for exactly one user, with its operations in the order
/// they were scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// Snapshot of the user as observed at the start of the run.
    pub user: ObservedUser,
    /// Operations to apply, in scheduling order.
    pub operations: Vec<Operation>,
}

impl UpdateRecord {
    /// Start a record for `user` with its first operation.
    #[must_use]
    pub fn new(user: ObservedUser, first: Operation) -> Self {
        Self {
            user,
            operations: vec![first],
        }
    }

    /// Append an operation.
    pub fn push(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    /// Check whether this record belongs to `identity` (any address matches).
    #[must_use]
    pub fn matches(&self, identity: &Identity) -> bool {
        self.user.answers_to(identity)
    }

    /// Label for logs.
    #[must_use]
    pub fn label(&self) -> String {
        self.user.label()
    }

    /// Entitlements scheduled for addition.
    pub fn adds(&self) -> impl Iterator<Item = &Entitlement> {
        self.of_kind(OperationKind::Add)
    }

    /// Entitlements scheduled for removal.
    pub fn removes(&self) -> impl Iterator<Item = &Entitlement> {
        self.of_kind(OperationKind::Remove)
    }

    fn of_kind(&self, kind: OperationKind) -> impl Iterator<Item = &Entitlement> {
        self.operations
            .iter()
            .filter(move |op| op.kind == kind)
            .map(|op| &op.entitlement)
    }

    /// Full entitlement set the user should hold once the record is applied.
    #[must_use]
    pub fn target_entitlements(&self) -> Vec<Entitlement> {
        self.operations
            .iter()
            .fold(self.user.entitlements.clone(), |mut set, op| {
                match op.kind {
                    OperationKind::Add => {
                        if !set.contains(&op.entitlement) {
                            set.push(op.entitlement.clone());
                        }
                    }
                    OperationKind::Remove => set.retain(|held| held != &op.entitlement),
                }
                set
            })
    }

    /// The user record to write back: the snapshot with its entitlement set
    /// replaced by [`Self::target_entitlements`].
    #[must_use]
    pub fn replacement(&self) -> ObservedUser {
        ObservedUser {
            entitlements: self.target_entitlements(),
            ..self.user.clone()
        }
    }

    /// One-line summary, e.g. `alice@example.com: add X, remove Y`.
    #[must_use]
    pub fn summary(&self) -> String {
        format!("{}: {}", self.label(), self.operations.iter().join(", "))
    }
}
