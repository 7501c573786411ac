//! Optimistic Projector.
//!
//! Pure functions from (view, change) to the provisional next view. Input
//! views are never modified; a changed view is a new value.
//!
//! | Change | Flat view | Segmented view | Single view |
//! |---|---|---|---|
//! | create | page 1: place entity, count +1; other pages: count +1 | segment 0 only: place entity, count +1 | untouched |
//! | update | merge by id | merge by id in every segment | merge if same id |
//! | delete | remove by id, count -1 | remove by id in every segment, count -1 in every segment | removed if same id |
//!
//! Opaque (not loaded or unrecognized) views are always left untouched.

use serde_json::{Map, Value};

use crate::domain::{
    CachedView, Entity, EntityId, FlatView, MergeStrategy, Placement, SegmentedView, UpdateMode,
};

/// A change to project.
#[derive(Debug, Clone, Copy)]
pub enum Change<'a> {
    /// A provisional entity is being created.
    Create(&'a Entity),
    /// `patch` is being applied to `id`.
    Update {
        /// Target entity.
        id: &'a EntityId,
        /// Fields being written.
        patch: &'a Map<String, Value>,
    },
    /// `id` is being deleted.
    Delete(&'a EntityId),
}

/// Result of projecting one view.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Nothing to write.
    Unchanged,
    /// Write this view.
    Updated(CachedView),
    /// Remove the view.
    Removed,
}

impl Projection {
    /// Returns true unless the projection is [`Projection::Unchanged`].
    #[must_use]
    pub const fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

// =============================================================================
// Entity-list helpers
// =============================================================================

/// Inserts `entity` at the front or back.
pub(crate) fn place(data: &mut Vec<Entity>, entity: Entity, placement: Placement) {
    match placement {
        Placement::Prepend => data.insert(0, entity),
        Placement::Append => data.push(entity),
    }
}

/// Applies `patch` to the entity with `id`; returns false if absent.
pub(crate) fn patch_in(
    data: &mut [Entity],
    id: &EntityId,
    patch: &Map<String, Value>,
    mode: UpdateMode,
) -> bool {
    let mut found = false;
    for entity in data.iter_mut().filter(|entity| &entity.id == id) {
        *entity = apply_patch(entity, patch, mode);
        found = true;
    }
    found
}

/// Removes every entity with `id`; returns false if none was there.
pub(crate) fn remove_from(data: &mut Vec<Entity>, id: &EntityId) -> bool {
    let before = data.len();
    data.retain(|entity| &entity.id != id);
    data.len() != before
}

pub(crate) fn apply_patch(entity: &Entity, patch: &Map<String, Value>, mode: UpdateMode) -> Entity {
    match mode {
        UpdateMode::ShallowMerge => entity.merged(patch),
        UpdateMode::Replace => entity.replaced(patch),
    }
}

// =============================================================================
// Projector
// =============================================================================

/// Computes optimistic views.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimisticProjector;

impl OptimisticProjector {
    /// Projects `change` onto `view`.
    #[must_use]
    pub fn project(view: &CachedView, change: Change<'_>, merge: MergeStrategy) -> Projection {
        match (view, change) {
            (CachedView::Opaque(_), _) => Projection::Unchanged,

            (CachedView::Flat(flat), Change::Create(entity)) => {
                Projection::Updated(CachedView::Flat(create_in_flat(flat, entity, merge.placement)))
            }
            (CachedView::Segmented(segmented), Change::Create(entity)) => {
                create_in_segmented(segmented, entity, merge.placement)
            }
            (CachedView::Single(_), Change::Create(_)) => Projection::Unchanged,

            (CachedView::Flat(flat), Change::Update { id, patch }) => {
                let mut data = flat.data.clone();
                if patch_in(&mut data, id, patch, merge.update) {
                    Projection::Updated(CachedView::Flat(FlatView::new(data, flat.meta.clone())))
                } else {
                    Projection::Unchanged
                }
            }
            (CachedView::Segmented(segmented), Change::Update { id, patch }) => {
                let mut changed = false;
                let pages = segmented
                    .pages
                    .iter()
                    .map(|page| {
                        let mut data = page.data.clone();
                        changed |= patch_in(&mut data, id, patch, merge.update);
                        FlatView::new(data, page.meta.clone())
                    })
                    .collect();
                if changed {
                    Projection::Updated(CachedView::Segmented(with_pages(segmented, pages)))
                } else {
                    Projection::Unchanged
                }
            }
            (CachedView::Single(entity), Change::Update { id, patch }) => {
                if &entity.id == id {
                    Projection::Updated(CachedView::Single(apply_patch(entity, patch, merge.update)))
                } else {
                    Projection::Unchanged
                }
            }

            (CachedView::Flat(flat), Change::Delete(id)) => delete_in_flat(flat, id),
            (CachedView::Segmented(segmented), Change::Delete(id)) => {
                delete_in_segmented(segmented, id)
            }
            (CachedView::Single(entity), Change::Delete(id)) => {
                if &entity.id == id {
                    Projection::Removed
                } else {
                    Projection::Unchanged
                }
            }
        }
    }
}

fn create_in_flat(flat: &FlatView, entity: &Entity, placement: Placement) -> FlatView {
    let meta = flat.meta.incremented();
    if flat.meta.is_first_page() {
        let mut data = flat.data.clone();
        place(&mut data, entity.clone(), placement);
        FlatView::new(data, meta)
    } else {
        FlatView::new(flat.data.clone(), meta)
    }
}

fn create_in_segmented(
    segmented: &SegmentedView,
    entity: &Entity,
    placement: Placement,
) -> Projection {
    let Some((first, rest)) = segmented.pages.split_first() else {
        return Projection::Unchanged;
    };
    let mut data = first.data.clone();
    place(&mut data, entity.clone(), placement);

    let mut pages = Vec::with_capacity(segmented.pages.len());
    pages.push(FlatView::new(data, first.meta.incremented()));
    pages.extend(rest.iter().cloned());
    Projection::Updated(CachedView::Segmented(with_pages(segmented, pages)))
}

fn delete_in_flat(flat: &FlatView, id: &EntityId) -> Projection {
    let mut data = flat.data.clone();
    let removed = remove_from(&mut data, id);
    let meta = flat.meta.decremented();
    if !removed && meta == flat.meta {
        return Projection::Unchanged;
    }
    Projection::Updated(CachedView::Flat(FlatView::new(data, meta)))
}

fn delete_in_segmented(segmented: &SegmentedView, id: &EntityId) -> Projection {
    // Every segment carries the collection total, so every segment drops by one.
    let mut changed = false;
    let pages: Vec<FlatView> = segmented
        .pages
        .iter()
        .map(|page| {
            let mut data = page.data.clone();
            let removed = remove_from(&mut data, id);
            let meta = page.meta.decremented();
            changed |= removed || meta != page.meta;
            FlatView::new(data, meta)
        })
        .collect();

    if !changed {
        return Projection::Unchanged;
    }
    Projection::Updated(CachedView::Segmented(with_pages(segmented, pages)))
}

pub(crate) fn with_pages(segmented: &SegmentedView, pages: Vec<FlatView>) -> SegmentedView {
    SegmentedView {
        pages,
        page_params: segmented.page_params.clone(),
    }
}

// =============================================================================
// Tests
// =============================================================================
