//! Directory gateway backed by an LDAP / Active Directory server.

use std::collections::BTreeSet;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use licsync_core::{DirectoryError, DirectoryGateway, DirectoryResult, Identity};
use tracing::{debug, info, instrument, warn};

use crate::config::LdapConfig;

/// LDAP gateway holding one bound connection for the whole run.
pub struct LdapDirectory {
    config: LdapConfig,
    ldap: Ldap,
}

impl LdapDirectory {
    /// Connect and bind.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid, the server cannot
    /// be reached, or the bind is refused.
    pub async fn connect(config: LdapConfig) -> DirectoryResult<Self> {
        config.validate()?;
        let password = config.resolve_password()?;

        debug!(url = %config.url, "Connecting to LDAP server");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(config.timeout())
            .set_starttls(config.starttls);

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &config.url)
            .await
            .map_err(|e| DirectoryError::connection(format!("{}: {e}", config.url)))?;

        // Spawn the connection driver
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        ldap.with_timeout(config.timeout())
            .simple_bind(&config.bind_dn, &password)
            .await
            .and_then(ldap3::LdapResult::success)
            .map_err(|e| DirectoryError::bind(&config.bind_dn, e.to_string()))?;

        info!(url = %config.url, base_dn = %config.base_dn, "Bound to directory");
        Ok(Self { config, ldap })
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &LdapConfig {
        &self.config
    }

    /// Unbind and drop the connection.
    ///
    /// # Errors
    ///
    /// Returns a connection error when the unbind request cannot be sent.
    pub async fn close(mut self) -> DirectoryResult<()> {
        self.ldap
            .unbind()
            .await
            .map_err(|e| DirectoryError::connection(e.to_string()))
    }
}

#[async_trait]
impl DirectoryGateway for LdapDirectory {
    #[instrument(skip(self))]
    async fn resolve_members(&self, filter: &str) -> DirectoryResult<BTreeSet<Identity>> {
        let mut ldap = self.ldap.clone();
        let attribute = self.config.mail_attribute.as_str();

        let (entries, _) = ldap
            .with_timeout(self.config.timeout())
            .search(&self.config.base_dn, Scope::Subtree, filter, vec![attribute])
            .await
            .and_then(ldap3::SearchResult::success)
            .map_err(|e| DirectoryError::search(filter, e.to_string()))?;

        let entry_count = entries.len();
        let members =
            collect_identities(entries.into_iter().map(SearchEntry::construct), attribute);

        if members.is_empty() {
            debug!(base_dn = %self.config.base_dn, "Query returned zero results");
        } else {
            debug!(entries = entry_count, identities = members.len(), "Query resolved");
        }
        Ok(members)
    }
}

/// Collect every value of `attribute` across `entries`.
///
/// The attribute is multi-valued: an entry with two addresses contributes
/// both. Attribute names compare case-insensitively, as LDAP does.
pub fn collect_identities(
    entries: impl IntoIterator<Item = SearchEntry>,
    attribute: &str,
) -> BTreeSet<Identity> {
    entries
        .into_iter()
        .flat_map(|entry| {
            entry
                .attrs
                .into_iter()
                .filter(|(name, _)| name.eq_ignore_ascii_case(attribute))
                .flat_map(|(_, values)| values)
        })
        .filter(|value| !value.trim().is_empty())
        .map(Identity::from)
        .collect()
}
