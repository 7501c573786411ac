//! Reconciler.
//!
//! Replaces optimistic state with what the server returned.
//!
//! - **create**: provisional entities (every one, or only this mutation's
//!   under [`Collapse::OwnOnly`]) and any earlier copy of the real id are
//!   removed from every page and segment, then the server entity is placed
//!   on page 1 / segment 0 only. Counts were already adjusted optimistically
//!   and are left alone.
//! - **update**: the server entity is folded in by id, like the optimistic
//!   update.
//! - **delete**: nothing to do.

use crate::domain::{CachedView, Collapse, Entity, EntityId, FlatView, MergeStrategy};

use super::projector::{Projection, patch_in, place, remove_from, with_pages};

/// Reconciles views with server responses.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reconciler;

impl Reconciler {
    /// Collapses a provisional entity into the server entity.
    #[must_use]
    pub fn reconcile_create(
        view: &CachedView,
        provisional_id: &EntityId,
        server: &Entity,
        merge: MergeStrategy,
    ) -> Projection {
        match view {
            CachedView::Flat(flat) => {
                let mut data = flat.data.clone();
                let removed = strip(&mut data, provisional_id, &server.id, merge.collapse);
                if flat.meta.is_first_page() {
                    place(&mut data, server.clone(), merge.placement);
                } else if !removed {
                    return Projection::Unchanged;
                }
                Projection::Updated(CachedView::Flat(FlatView::new(data, flat.meta.clone())))
            }
            CachedView::Segmented(segmented) => {
                if segmented.pages.is_empty() {
                    return Projection::Unchanged;
                }
                let pages = segmented
                    .pages
                    .iter()
                    .enumerate()
                    .map(|(index, page)| {
                        let mut data = page.data.clone();
                        strip(&mut data, provisional_id, &server.id, merge.collapse);
                        if index == 0 {
                            place(&mut data, server.clone(), merge.placement);
                        }
                        FlatView::new(data, page.meta.clone())
                    })
                    .collect();
                Projection::Updated(CachedView::Segmented(with_pages(segmented, pages)))
            }
            CachedView::Single(_) | CachedView::Opaque(_) => Projection::Unchanged,
        }
    }

    /// Folds the server's copy of an updated entity in by id.
    #[must_use]
    pub fn reconcile_update(view: &CachedView, server: &Entity, merge: MergeStrategy) -> Projection {
        match view {
            CachedView::Flat(flat) => {
                let mut data = flat.data.clone();
                if patch_in(&mut data, &server.id, &server.fields, merge.update) {
                    Projection::Updated(CachedView::Flat(FlatView::new(data, flat.meta.clone())))
                } else {
                    Projection::Unchanged
                }
            }
            CachedView::Segmented(segmented) => {
                let mut changed = false;
                let pages = segmented
                    .pages
                    .iter()
                    .map(|page| {
                        let mut data = page.data.clone();
                        changed |= patch_in(&mut data, &server.id, &server.fields, merge.update);
                        FlatView::new(data, page.meta.clone())
                    })
                    .collect();
                if changed {
                    Projection::Updated(CachedView::Segmented(with_pages(segmented, pages)))
                } else {
                    Projection::Unchanged
                }
            }
            CachedView::Single(_) | CachedView::Opaque(_) => Projection::Unchanged,
        }
    }

    /// Delete reconciliation: the optimistic removal already stands.
    #[must_use]
    pub const fn reconcile_delete(_view: &CachedView, _id: &EntityId) -> Projection {
        Projection::Unchanged
    }
}

/// Removes the placeholders `collapse` selects and any copy of `server_id`;
/// returns false if nothing was removed.
fn strip(
    data: &mut Vec<Entity>,
    provisional_id: &EntityId,
    server_id: &EntityId,
    collapse: Collapse,
) -> bool {
    let removed_real = remove_from(data, server_id);
    let removed_provisional = match collapse {
        Collapse::AllProvisional => {
            let before = data.len();
            data.retain(|entity| !entity.id.is_provisional());
            data.len() != before
        }
        Collapse::OwnOnly => remove_from(data, provisional_id),
    };
    removed_real || removed_provisional
}

// =============================================================================
// Tests
// =============================================================================
