//! Client-side view cache.
//!
//! [`CacheStore`] is the minimal key-value interface the synchronizer needs:
//! prefix lookup, set, remove and in-flight read cancellation. The store is
//! process-wide shared state; any caller may read or overwrite any key.
//!
//! # Versions
//!
//! Every write to a key (set or remove) bumps that key's version. Versions
//! are never reset, so a removed-then-recreated key keeps counting upwards.
//! Guarded rollback compares these versions. The version table therefore
//! holds one counter per key ever written, removed keys included.
//!
//! Read generations only live while a key has a pending read.
//!
//! # Read Cancellation
//!
//! A read registers itself with [`CacheStore::begin_read`] before it
//! suspends and publishes its result with [`CacheStore::complete_read`].
//! [`CacheStore::cancel_in_flight`] bumps the read generation of every
//! matching key that has a pending read, so a response that was already on
//! the wire is discarded instead of clobbering an optimistic write.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::{CachedView, ViewKey, ViewKeyPrefix};

// =============================================================================
// Read Ticket
// =============================================================================

/// Handle for one in-flight read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadTicket {
    key: ViewKey,
    generation: u64,
}

impl ReadTicket {
    /// Key being read.
    #[must_use]
    pub const fn key(&self) -> &ViewKey {
        &self.key
    }

    /// Read generation observed when the read started.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

// =============================================================================
// Cache Store Port
// =============================================================================

/// Key-value store of cached views.
///
/// Implementations must be cheap to call from synchronous code: none of these
/// methods may suspend.
pub trait CacheStore: Send + Sync {
    /// Every cached view whose key falls under `prefix`, in key order.
    fn views_by_prefix(&self, prefix: &ViewKeyPrefix) -> Vec<(ViewKey, Arc<CachedView>)>;

    /// The view stored under `key`.
    fn view(&self, key: &ViewKey) -> Option<Arc<CachedView>>;

    /// Stores `view` under `key`, returning the key's new version.
    fn set_view(&self, key: ViewKey, view: Arc<CachedView>) -> u64;

    /// Removes `key`, returning the key's new version.
    fn remove_view(&self, key: &ViewKey) -> u64;

    /// Current write version of `key` (0 if never written).
    fn version(&self, key: &ViewKey) -> u64;

    /// Cancels every pending read under `prefix`; returns how many keys had
    /// a pending read.
    fn cancel_in_flight(&self, prefix: &ViewKeyPrefix) -> usize;

    /// Registers a read of `key`.
    fn begin_read(&self, key: &ViewKey) -> ReadTicket;

    /// Publishes the result of a read. Returns false (and stores nothing) if
    /// the read was cancelled since it began.
    fn complete_read(&self, ticket: &ReadTicket, view: CachedView) -> bool;

    /// Unregisters a read that failed.
    fn abandon_read(&self, ticket: &ReadTicket);

    /// Every cached view, in key order.
    fn entries(&self) -> Vec<(ViewKey, Arc<CachedView>)>;
}

// =============================================================================
// In-Memory Cache Store
// =============================================================================

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<ViewKey, Arc<CachedView>>,
    versions: HashMap<ViewKey, u64>,
    generations: HashMap<ViewKey, u64>,
    pending: HashMap<ViewKey, usize>,
}

impl CacheState {
    fn bump_version(&mut self, key: &ViewKey) -> u64 {
        let version = self.versions.entry(key.clone()).or_insert(0);
        *version += 1;
        *version
    }

    /// Drops one pending read of `key`. With no read left outstanding no
    /// ticket can observe the generation, so it is forgotten too.
    fn release(&mut self, key: &ViewKey) {
        if let Some(count) = self.pending.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pending.remove(key);
                self.generations.remove(key);
            }
        }
    }
}

/// Thread-safe in-process [`CacheStore`].
///
/// Views are stored behind `Arc`, so snapshots taken by the synchronizer
/// share structure with the live cache and cost one reference count.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCacheStore {
    state: Arc<RwLock<CacheState>>,
}

impl InMemoryCacheStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached views.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Number of keys with a pending read.
    #[must_use]
    pub fn pending_reads(&self) -> usize {
        self.state.read().pending.len()
    }
}

fn sorted(mut entries: Vec<(ViewKey, Arc<CachedView>)>) -> Vec<(ViewKey, Arc<CachedView>)> {
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));
    entries
}

impl CacheStore for InMemoryCacheStore {
    fn views_by_prefix(&self, prefix: &ViewKeyPrefix) -> Vec<(ViewKey, Arc<CachedView>)> {
        let guard = self.state.read();
        let matching = guard
            .entries
            .iter()
            .filter(|(key, _)| prefix.matches(key))
            .map(|(key, view)| (key.clone(), Arc::clone(view)))
            .collect();
        drop(guard);
        sorted(matching)
    }

    fn view(&self, key: &ViewKey) -> Option<Arc<CachedView>> {
        self.state.read().entries.get(key).cloned()
    }

    fn set_view(&self, key: ViewKey, view: Arc<CachedView>) -> u64 {
        let mut guard = self.state.write();
        let version = guard.bump_version(&key);
        guard.entries.insert(key, view);
        version
    }

    fn remove_view(&self, key: &ViewKey) -> u64 {
        let mut guard = self.state.write();
        guard.entries.remove(key);
        guard.bump_version(key)
    }

    fn version(&self, key: &ViewKey) -> u64 {
        self.state.read().versions.get(key).copied().unwrap_or(0)
    }

    fn cancel_in_flight(&self, prefix: &ViewKeyPrefix) -> usize {
        let mut guard = self.state.write();
        let cancelled: Vec<ViewKey> = guard
            .pending
            .keys()
            .filter(|key| prefix.matches(key))
            .cloned()
            .collect();
        for key in &cancelled {
            *guard.generations.entry(key.clone()).or_insert(0) += 1;
        }
        drop(guard);

        if !cancelled.is_empty() {
            tracing::debug!(prefix = %prefix, cancelled = cancelled.len(), "Cancelled in-flight reads");
        }
        cancelled.len()
    }

    fn begin_read(&self, key: &ViewKey) -> ReadTicket {
        let mut guard = self.state.write();
        *guard.pending.entry(key.clone()).or_insert(0) += 1;
        let generation = guard.generations.get(key).copied().unwrap_or(0);
        ReadTicket {
            key: key.clone(),
            generation,
        }
    }

    fn complete_read(&self, ticket: &ReadTicket, view: CachedView) -> bool {
        let mut guard = self.state.write();
        let current = guard.generations.get(&ticket.key).copied().unwrap_or(0);
        guard.release(&ticket.key);
        if current != ticket.generation {
            drop(guard);
            tracing::debug!(key = %ticket.key, "Discarded cancelled read");
            return false;
        }
        guard.bump_version(&ticket.key);
        guard.entries.insert(ticket.key.clone(), Arc::new(view));
        true
    }

    fn abandon_read(&self, ticket: &ReadTicket) {
        self.state.write().release(&ticket.key);
    }

    fn entries(&self) -> Vec<(ViewKey, Arc<CachedView>)> {
        let guard = self.state.read();
        let all = guard
            .entries
            .iter()
            .map(|(key, view)| (key.clone(), Arc::clone(view)))
            .collect();
        drop(guard);
        sorted(all)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityId, ListQuery};
    use rstest::{fixture, rstest};
    use serde_json::json;

    #[fixture]
    fn store() -> InMemoryCacheStore {
        InMemoryCacheStore::new()
    }

    fn list_key(resource: &str, page: u64) -> ViewKey {
        ViewKey::list(resource, &ListQuery::new(page, 10))
    }

    fn opaque(value: serde_json::Value) -> Arc<CachedView> {
        Arc::new(CachedView::Opaque(value))
    }

    #[rstest]
    fn test_set_and_get(store: InMemoryCacheStore) {
        let key = list_key("lockers", 1);
        assert_eq!(store.set_view(key.clone(), opaque(json!(1))), 1);
        assert_eq!(store.view(&key).as_deref(), Some(&CachedView::Opaque(json!(1))));
        assert_eq!(store.len(), 1);
    }

    #[rstest]
    fn test_versions_survive_removal(store: InMemoryCacheStore) {
        let key = list_key("lockers", 1);
        store.set_view(key.clone(), opaque(json!(1)));
        assert_eq!(store.remove_view(&key), 2);
        assert!(store.view(&key).is_none());
        assert_eq!(store.set_view(key.clone(), opaque(json!(2))), 3);
        assert_eq!(store.version(&key), 3);
    }

    #[rstest]
    fn test_views_by_prefix_filters_and_sorts(store: InMemoryCacheStore) {
        store.set_view(list_key("lockers", 2), opaque(json!(2)));
        store.set_view(list_key("lockers", 1), opaque(json!(1)));
        store.set_view(list_key("igps", 1), opaque(json!(3)));
        store.set_view(
            ViewKey::detail("lockers", EntityId::new("l1")),
            opaque(json!(4)),
        );

        let lists = store.views_by_prefix(&ViewKeyPrefix::lists("lockers"));
        let keys: Vec<ViewKey> = lists.into_iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec![list_key("lockers", 1), list_key("lockers", 2)]);

        assert_eq!(store.views_by_prefix(&ViewKeyPrefix::resource("lockers")).len(), 3);
    }

    #[rstest]
    fn test_completed_read_is_published(store: InMemoryCacheStore) {
        let key = list_key("lockers", 1);
        let ticket = store.begin_read(&key);
        assert_eq!(store.pending_reads(), 1);

        assert!(store.complete_read(&ticket, CachedView::Opaque(json!("fresh"))));
        assert_eq!(store.view(&key).as_deref(), Some(&CachedView::Opaque(json!("fresh"))));
        assert_eq!(store.pending_reads(), 0);
    }

    #[rstest]
    fn test_cancelled_read_is_discarded(store: InMemoryCacheStore) {
        let key = list_key("lockers", 1);
        store.set_view(key.clone(), opaque(json!("optimistic")));
        let ticket = store.begin_read(&key);

        assert_eq!(store.cancel_in_flight(&ViewKeyPrefix::resource("lockers")), 1);
        assert!(!store.complete_read(&ticket, CachedView::Opaque(json!("stale"))));
        assert_eq!(
            store.view(&key).as_deref(),
            Some(&CachedView::Opaque(json!("optimistic")))
        );
    }

    #[rstest]
    fn test_cancel_only_touches_matching_prefix(store: InMemoryCacheStore) {
        let lockers = store.begin_read(&list_key("lockers", 1));
        let igps = store.begin_read(&list_key("igps", 1));

        assert_eq!(store.cancel_in_flight(&ViewKeyPrefix::resource("igps")), 1);
        assert!(store.complete_read(&lockers, CachedView::Opaque(json!(1))));
        assert!(!store.complete_read(&igps, CachedView::Opaque(json!(2))));
    }

    #[rstest]
    fn test_read_started_after_cancel_is_kept(store: InMemoryCacheStore) {
        let key = list_key("lockers", 1);
        let first = store.begin_read(&key);
        store.cancel_in_flight(&ViewKeyPrefix::resource("lockers"));
        let second = store.begin_read(&key);

        assert!(!store.complete_read(&first, CachedView::Opaque(json!(1))));
        assert!(store.complete_read(&second, CachedView::Opaque(json!(2))));
    }

    #[rstest]
    fn test_cancel_without_pending_reads_is_noop(store: InMemoryCacheStore) {
        store.set_view(list_key("lockers", 1), opaque(json!(1)));
        assert_eq!(store.cancel_in_flight(&ViewKeyPrefix::resource("lockers")), 0);
    }

    #[rstest]
    fn test_generations_are_dropped_once_reads_drain(store: InMemoryCacheStore) {
        let key = list_key("lockers", 1);
        let first = store.begin_read(&key);
        store.cancel_in_flight(&ViewKeyPrefix::resource("lockers"));
        let second = store.begin_read(&key);

        assert!(!store.complete_read(&first, CachedView::Opaque(json!(1))));
        assert_eq!(store.state.read().generations.len(), 1);
        assert!(store.complete_read(&second, CachedView::Opaque(json!(2))));
        assert!(store.state.read().generations.is_empty());

        let cancelled = store.begin_read(&key);
        store.cancel_in_flight(&ViewKeyPrefix::resource("lockers"));
        store.abandon_read(&cancelled);
        assert!(store.state.read().generations.is_empty());
        assert!(store.complete_read(&store.begin_read(&key), CachedView::Opaque(json!(3))));
    }

    #[rstest]
    fn test_abandon_read_releases_pending(store: InMemoryCacheStore) {
        let ticket = store.begin_read(&list_key("lockers", 1));
        store.abandon_read(&ticket);
        assert_eq!(store.pending_reads(), 0);
        assert!(store.is_empty());
    }
}
