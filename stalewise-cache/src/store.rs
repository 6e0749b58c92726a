//! Keyed collection of cache entries with a base key index.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use stalewise_core::{base_key_of, compute_key, QueryParams};
use tracing::debug;

use crate::entry::CacheEntry;

#[derive(Default)]
struct StoreInner {
    entries: HashMap<String, Arc<CacheEntry>>,
    /// Base key -> every computed key derived from it.
    base_key_index: HashMap<String, BTreeSet<String>>,
}

impl StoreInner {
    fn index(&mut self, entry: &CacheEntry) {
        self.base_key_index
            .entry(entry.base_key().to_string())
            .or_default()
            .insert(entry.key().to_string());
    }

    fn unindex(&mut self, entry: &CacheEntry) {
        if let Some(keys) = self.base_key_index.get_mut(entry.base_key()) {
            keys.remove(entry.key());
            if keys.is_empty() {
                self.base_key_index.remove(entry.base_key());
            }
        }
    }
}

/// Every cached entry of a coordinator.
///
/// Each entry is indexed under exactly one base key, so invalidating a base
/// key reaches all and only the entries derived from it.
#[derive(Default)]
pub struct CacheStore {
    inner: RwLock<StoreInner>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with seeded entries.
    pub fn with_entries(entries: impl IntoIterator<Item = CacheEntry>) -> Self {
        let store = Self::new();
        for entry in entries {
            store.insert(Arc::new(entry));
        }
        store
    }

    /// Computed key of a base key and its parameters.
    pub fn key_for(base_key: &str, params: Option<&QueryParams>) -> String {
        compute_key(base_key, params)
    }

    /// Entry for a key and its parameters, created on first access.
    pub fn get_or_create(&self, key: &str, params: Option<&QueryParams>) -> Arc<CacheEntry> {
        let computed = compute_key(key, params);
        if let Some(entry) = self.read().entries.get(&computed) {
            return Arc::clone(entry);
        }

        let mut inner = self.write();
        // Another caller may have created it between the two locks
        if let Some(entry) = inner.entries.get(&computed) {
            return Arc::clone(entry);
        }

        let entry = Arc::new(CacheEntry::with_base_key(computed.clone(), base_key_of(key)));
        inner.index(&entry);
        inner.entries.insert(computed, Arc::clone(&entry));
        debug!(key = %entry.key(), base_key = %entry.base_key(), "Cache entry created");
        entry
    }

    /// Add a pre-built entry, replacing any entry with the same key.
    pub fn insert(&self, entry: Arc<CacheEntry>) -> Option<Arc<CacheEntry>> {
        let mut inner = self.write();
        let previous = inner
            .entries
            .insert(entry.key().to_string(), Arc::clone(&entry));
        if let Some(previous) = &previous {
            inner.unindex(previous);
        }
        inner.index(&entry);
        previous
    }

    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.read().entries.get(key).cloned()
    }

    /// Invalidate every entry derived from the given base keys.
    ///
    /// Inline query strings are stripped, so a mutated URL invalidates its
    /// resource. Returns the invalidated computed keys in base key order,
    /// each once.
    pub fn invalidate<S: AsRef<str>>(&self, base_keys: &[S]) -> Vec<String> {
        let inner = self.read();
        let mut seen = HashSet::new();
        let mut invalidated = Vec::new();

        for base_key in base_keys {
            let base_key = base_key_of(base_key.as_ref());
            let Some(keys) = inner.base_key_index.get(base_key) else {
                continue;
            };
            for key in keys {
                if !seen.insert(key.as_str()) {
                    continue;
                }
                if let Some(entry) = inner.entries.get(key) {
                    entry.invalidate();
                    invalidated.push(key.clone());
                }
            }
        }

        debug!(count = invalidated.len(), "Cache entries invalidated");
        invalidated
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.write();
        inner.entries.clear();
        inner.base_key_index.clear();
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Computed keys indexed under a base key.
    pub fn keys_for_base(&self, base_key: &str) -> Vec<String> {
        self.read()
            .base_key_index
            .get(base_key)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.read();
        f.debug_struct("CacheStore")
            .field("entries", &inner.entries.len())
            .field("base_keys", &inner.base_key_index.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stalewise_test_utils::{Clock, ManualClock};

    fn page(env: &str, page: u32) -> QueryParams {
        QueryParams::new().with("env", env).with("page", page)
    }

    #[test]
    fn test_get_or_create_reuses_entries() {
        let store = CacheStore::new();
        let first = store.get_or_create("/api/v1/apps", None);
        let second = store.get_or_create("/api/v1/apps", Some(&QueryParams::new()));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_parameterized_entries_share_base_key() {
        let store = CacheStore::new();
        let one = store.get_or_create("/api/v1/apps/1/deployments", Some(&page("production", 1)));
        let two = store.get_or_create("/api/v1/apps/1/deployments", Some(&page("production", 2)));

        assert_eq!(one.base_key(), "/api/v1/apps/1/deployments");
        assert_eq!(two.base_key(), "/api/v1/apps/1/deployments");
        assert_eq!(
            store.keys_for_base("/api/v1/apps/1/deployments"),
            vec![
                "/api/v1/apps/1/deployments?env=production&page=1".to_string(),
                "/api/v1/apps/1/deployments?env=production&page=2".to_string(),
            ]
        );
    }

    #[test]
    fn test_invalidate_reaches_all_and_only_derived_entries() {
        let clock = ManualClock::fixed();
        let dedupe = chrono::Duration::milliseconds(2000);
        let store = CacheStore::new();

        let app = store.get_or_create("/api/v1/apps/1", None);
        let deployments = "/api/v1/apps/1/deployments";
        let page_one = store.get_or_create(deployments, Some(&page("production", 1)));
        let page_two = store.get_or_create(deployments, Some(&page("production", 2)));
        let health = store.get_or_create("/api/v1/health", None);
        for entry in [&app, &page_one, &page_two, &health] {
            entry.set(json!(null), clock.now());
        }

        let keys = store.invalidate(&[deployments]);

        assert_eq!(keys.len(), 2);
        assert!(page_one.must_revalidate(dedupe, clock.now()));
        assert!(page_two.must_revalidate(dedupe, clock.now()));
        assert!(!app.must_revalidate(dedupe, clock.now()));
        assert!(!health.must_revalidate(dedupe, clock.now()));
    }

    #[test]
    fn test_invalidate_strips_inline_query_and_dedupes() {
        let store = CacheStore::new();
        store.get_or_create("/api/v1/jobs", Some(&QueryParams::new().with("page", 1)));

        let keys = store.invalidate(&["/api/v1/jobs?page=3", "/api/v1/jobs", "/api/v1/unknown"]);
        assert_eq!(keys, vec!["/api/v1/jobs?page=1".to_string()]);
    }

    #[test]
    fn test_insert_replaces_and_reindexes() {
        let clock = ManualClock::fixed();
        let store = CacheStore::new();
        store.get_or_create("/api/v1/apps/1", None);

        let previous = store.insert(Arc::new(CacheEntry::seeded(
            "/api/v1/apps/1",
            json!({ "id": 1 }),
            clock.now(),
        )));

        assert!(previous.is_some());
        assert_eq!(store.len(), 1);
        assert_eq!(store.keys_for_base("/api/v1/apps/1").len(), 1);
        let entry = store.get("/api/v1/apps/1").unwrap();
        assert_eq!(entry.snapshot().data, Some(json!({ "id": 1 })));
    }

    #[test]
    fn test_clear_drops_everything() {
        let store = CacheStore::with_entries([CacheEntry::new("/api/v1/apps")]);
        assert!(!store.is_empty());

        store.clear();
        assert!(store.is_empty());
        assert!(store.invalidate(&["/api/v1/apps"]).is_empty());
    }
}
