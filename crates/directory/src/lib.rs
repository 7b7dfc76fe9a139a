#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # licsync-directory
//!
//! Directory gateways resolving membership filters to identities.
//!
//! - [`LdapDirectory`]: Active Directory / LDAP over `ldap3`
//! - [`InMemoryDirectory`]: fixed answers, for tests and rehearsals
//! - [`filter`]: nested-group filter construction with proper escaping

pub mod config;
pub mod filter;
pub mod ldap;
pub mod memory;

pub use config::LdapConfig;
pub use filter::{DEFAULT_UNIVERSE_FILTER, escape_filter_value, nested_group_filter};
pub use ldap::{LdapDirectory, collect_identities};
pub use memory::InMemoryDirectory;
