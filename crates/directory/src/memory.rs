//! In-memory directory gateway.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use licsync_core::{DirectoryGateway, DirectoryResult, Identity};

/// Gateway answering from a fixed filter → members table.
///
/// Filters that were never registered resolve to the empty set, the same
/// answer a directory gives for a query matching nothing.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    entries: HashMap<String, BTreeSet<Identity>>,
    queries: AtomicUsize,
}

impl InMemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the members returned for `filter`.
    #[must_use]
    pub fn with_filter<I, S>(mut self, filter: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Identity>,
    {
        self.entries
            .insert(filter.into(), members.into_iter().map(Into::into).collect());
        self
    }

    /// Number of queries answered so far.
    #[must_use]
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DirectoryGateway for InMemoryDirectory {
    async fn resolve_members(&self, filter: &str) -> DirectoryResult<BTreeSet<Identity>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        Ok(self.entries.get(filter).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_filter_is_empty_not_error() -> Result<(), Box<dyn std::error::Error>> {
        let directory = InMemoryDirectory::new().with_filter("(cn=a)", ["alice@example.com"]);

        assert_eq!(directory.resolve_members("(cn=a)").await?.len(), 1);
        assert!(directory.resolve_members("(cn=b)").await?.is_empty());
        assert_eq!(directory.queries(), 2);
        Ok(())
    }
}
