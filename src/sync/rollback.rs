//! Rollback Handler.
//!
//! Writes every captured snapshot back after a failed mutation, last
//! captured first. A snapshot of an empty key removes the key. Rollback
//! never fails.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::ViewKey;
use crate::infrastructure::CacheStore;

use super::snapshot::SnapshotSet;

// =============================================================================
// Policy
// =============================================================================

/// How rollback treats keys that changed after the optimistic write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackPolicy {
    /// Restore every snapshot unconditionally.
    #[default]
    Overwrite,
    /// Restore a key only if this mutation's optimistic write is still the
    /// latest write to it.
    VersionGuarded,
}

impl FromStr for RollbackPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace('_', "-").as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "version-guarded" | "guarded" => Ok(Self::VersionGuarded),
            _ => Err(format!("Unknown rollback policy: {value}")),
        }
    }
}

impl std::fmt::Display for RollbackPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overwrite => write!(formatter, "overwrite"),
            Self::VersionGuarded => write!(formatter, "version-guarded"),
        }
    }
}

// =============================================================================
// Handler
// =============================================================================

/// What a rollback did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    /// Keys written back, in restore order.
    pub restored: Vec<ViewKey>,
    /// Keys left alone under [`RollbackPolicy::VersionGuarded`].
    pub skipped: Vec<ViewKey>,
}

/// Restores snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollbackHandler;

impl RollbackHandler {
    /// Restores `snapshots`.
    ///
    /// `written` maps each key the optimistic step wrote to the version that
    /// write produced; only [`RollbackPolicy::VersionGuarded`] reads it.
    pub fn rollback(
        store: &dyn CacheStore,
        snapshots: &SnapshotSet,
        written: &HashMap<ViewKey, u64>,
        policy: RollbackPolicy,
    ) -> RollbackReport {
        let mut report = RollbackReport::default();

        for snapshot in snapshots.snapshots().iter().rev() {
            let key = snapshot.key();

            if policy == RollbackPolicy::VersionGuarded {
                let Some(&ours) = written.get(key) else {
                    continue;
                };
                let current = store.version(key);
                if current != ours {
                    tracing::warn!(
                        mutation_id = %snapshots.mutation_id(),
                        key = %key,
                        expected = ours,
                        current,
                        "Skipped rollback of a view written by another mutation"
                    );
                    report.skipped.push(key.clone());
                    continue;
                }
            }

            match snapshot.view() {
                Some(view) => {
                    store.set_view(key.clone(), Arc::clone(view));
                }
                None => {
                    store.remove_view(key);
                }
            }
            report.restored.push(key.clone());
        }

        tracing::warn!(
            mutation_id = %snapshots.mutation_id(),
            restored = report.restored.len(),
            skipped = report.skipped.len(),
            "Rolled back optimistic update"
        );
        report
    }
}

// =============================================================================
// Tests
// =============================================================================
