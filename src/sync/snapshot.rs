//! Snapshot Manager.
//!
//! Captures every view a mutation may touch before the optimistic write, so
//! that rollback can restore them verbatim. Views are held by `Arc`; a
//! snapshot is a reference to the exact value that was in the cache, not a
//! copy.

use std::sync::Arc;

use crate::domain::{CachedView, ViewKey, ViewKeyPrefix};
use crate::infrastructure::CacheStore;

use super::mutation::MutationId;

// =============================================================================
// Selection
// =============================================================================

/// Which views a mutation touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewSelection {
    /// Collection views, matched by prefix.
    pub prefixes: Vec<ViewKeyPrefix>,
    /// Exact keys, captured even when absent.
    pub keys: Vec<ViewKey>,
}

impl ViewSelection {
    /// Selects every view under `prefixes`.
    #[must_use]
    pub fn prefixes(prefixes: &[ViewKeyPrefix]) -> Self {
        Self {
            prefixes: prefixes.to_vec(),
            keys: Vec::new(),
        }
    }

    /// Also selects `key`.
    #[must_use]
    pub fn with_key(mut self, key: ViewKey) -> Self {
        self.keys.push(key);
        self
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// The prior contents of one view.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    key: ViewKey,
    view: Option<Arc<CachedView>>,
    version: u64,
}

impl Snapshot {
    /// Key the view was read from.
    #[must_use]
    pub const fn key(&self) -> &ViewKey {
        &self.key
    }

    /// Captured view; `None` if the key was empty.
    #[must_use]
    pub fn view(&self) -> Option<&Arc<CachedView>> {
        self.view.as_ref()
    }

    /// Cache version of the key at capture time.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }
}

/// Snapshots taken for one mutation, in capture order.
#[derive(Debug, Clone)]
pub struct SnapshotSet {
    mutation_id: MutationId,
    snapshots: Vec<Snapshot>,
}

impl SnapshotSet {
    /// Mutation that took the snapshots.
    #[must_use]
    pub const fn mutation_id(&self) -> MutationId {
        self.mutation_id
    }

    /// Snapshots in capture order.
    #[must_use]
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Number of captured views.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Returns true if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Snapshot of `key`, if captured.
    #[must_use]
    pub fn get(&self, key: &ViewKey) -> Option<&Snapshot> {
        self.snapshots.iter().find(|snapshot| &snapshot.key == key)
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Takes snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotManager;

impl SnapshotManager {
    /// Cancels in-flight reads for the selection, then captures it.
    ///
    /// Never suspends: the caller applies its optimistic write before any
    /// other task can observe the cache between capture and apply.
    #[must_use]
    pub fn capture(
        store: &dyn CacheStore,
        mutation_id: MutationId,
        selection: &ViewSelection,
    ) -> SnapshotSet {
        for prefix in &selection.prefixes {
            store.cancel_in_flight(prefix);
        }
        for key in &selection.keys {
            store.cancel_in_flight(&ViewKeyPrefix::details(key.resource()));
        }

        let mut snapshots: Vec<Snapshot> = Vec::new();
        for prefix in &selection.prefixes {
            for (key, view) in store.views_by_prefix(prefix) {
                if snapshots.iter().any(|snapshot| snapshot.key == key) {
                    continue;
                }
                let version = store.version(&key);
                snapshots.push(Snapshot {
                    key,
                    view: Some(view),
                    version,
                });
            }
        }
        for key in &selection.keys {
            if snapshots.iter().any(|snapshot| &snapshot.key == key) {
                continue;
            }
            snapshots.push(Snapshot {
                key: key.clone(),
                view: store.view(key),
                version: store.version(key),
            });
        }

        tracing::debug!(%mutation_id, captured = snapshots.len(), "Captured snapshots");
        SnapshotSet {
            mutation_id,
            snapshots,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
