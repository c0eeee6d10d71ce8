//! Per-organization cache of resolved configuration.
//!
//! Resolution is cheap but read on every admin and evaluation request.
//! Entries expire after a TTL and are invalidated explicitly on every
//! configuration write. Running evaluations never read from here: they
//! carry their own snapshot.

use attest_core::{ConfigSnapshot, OrgId};
use moka::future::Cache;
use std::time::Duration;

/// Resolved configuration keyed by organization.
pub struct ConfigCache {
    cache: Cache<OrgId, ConfigSnapshot>,
}

impl ConfigCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();

        Self { cache }
    }

    pub async fn get(&self, org_id: &OrgId) -> Option<ConfigSnapshot> {
        self.cache.get(org_id).await
    }

    pub async fn insert(&self, org_id: OrgId, snapshot: ConfigSnapshot) {
        self.cache.insert(org_id, snapshot).await;
    }

    /// Drop one organization's entry after its configuration changed.
    pub async fn invalidate(&self, org_id: &OrgId) {
        self.cache.invalidate(org_id).await;
    }

    /// Drop everything after a platform-level change.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for ConfigCache {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(300))
    }
}

impl std::fmt::Debug for ConfigCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigCache")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}
