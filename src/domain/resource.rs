//! Per-resource descriptors.
//!
//! One descriptor parameterizes one synchronizer: which cache views a write to
//! the resource touches, how entities are merged into them, and which payload
//! fields a create must carry.

use serde::{Deserialize, Serialize};

use super::entity::EntityId;
use super::view::{ViewKey, ViewKeyPrefix};

// =============================================================================
// Merge Strategy
// =============================================================================

/// Where a newly created entity lands on the first page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Front of the first page (newest-first listings).
    #[default]
    Prepend,
    /// End of the first page (listings ordered by a natural key).
    Append,
}

/// How an update patch is folded into a cached entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Patch fields overwrite, other fields are kept.
    #[default]
    ShallowMerge,
    /// Patch becomes the full field set.
    Replace,
}

/// Which provisional entities a successful create reconciliation removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collapse {
    /// Every provisional entity in the view.
    #[default]
    AllProvisional,
    /// Only the reconciling mutation's own placeholder; concurrent creates
    /// keep theirs until they settle.
    OwnOnly,
}

/// Per-resource merge rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MergeStrategy {
    /// Create placement.
    pub placement: Placement,
    /// Update folding.
    pub update: UpdateMode,
    /// Provisional cleanup on create reconciliation.
    pub collapse: Collapse,
}

impl MergeStrategy {
    /// Prepend on create, shallow-merge on update, collapse every
    /// provisional entity.
    pub const DEFAULT: Self = Self {
        placement: Placement::Prepend,
        update: UpdateMode::ShallowMerge,
        collapse: Collapse::AllProvisional,
    };

    /// Append on create, otherwise as [`Self::DEFAULT`].
    pub const APPEND: Self = Self {
        placement: Placement::Append,
        update: UpdateMode::ShallowMerge,
        collapse: Collapse::AllProvisional,
    };

    /// Returns a copy with another collapse rule.
    #[must_use]
    pub const fn with_collapse(self, collapse: Collapse) -> Self {
        Self {
            placement: self.placement,
            update: self.update,
            collapse,
        }
    }
}

// =============================================================================
// Resource Descriptor
// =============================================================================

/// Describes one CRUD resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    name: String,
    endpoint: String,
    view_prefixes: Vec<ViewKeyPrefix>,
    merge: MergeStrategy,
    required_fields: Vec<String>,
}

impl ResourceDescriptor {
    /// Creates a descriptor touching the list and infinite views of `name`.
    ///
    /// `endpoint` is the path segment used by the HTTP routes, e.g.
    /// `water-supply` for `/water-supply/create-water-supply`.
    #[must_use]
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            view_prefixes: vec![
                ViewKeyPrefix::lists(name.clone()),
                ViewKeyPrefix::infinite(name.clone()),
            ],
            name,
            endpoint: endpoint.into(),
            merge: MergeStrategy::DEFAULT,
            required_fields: Vec::new(),
        }
    }

    /// Adds another view prefix that holds entities of this resource.
    #[must_use]
    pub fn with_view_prefix(mut self, prefix: ViewKeyPrefix) -> Self {
        self.view_prefixes.push(prefix);
        self
    }

    /// Sets the merge strategy.
    #[must_use]
    pub fn with_merge(mut self, merge: MergeStrategy) -> Self {
        self.merge = merge;
        self
    }

    /// Sets the fields a create payload must contain.
    #[must_use]
    pub fn with_required_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Cache resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// HTTP endpoint segment.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Prefixes of every collection view a write touches.
    #[must_use]
    pub fn view_prefixes(&self) -> &[ViewKeyPrefix] {
        &self.view_prefixes
    }

    /// Merge strategy.
    #[must_use]
    pub const fn merge(&self) -> MergeStrategy {
        self.merge
    }

    /// Fields a create payload must carry.
    #[must_use]
    pub fn required_fields(&self) -> &[String] {
        &self.required_fields
    }

    /// Key of the single-entity view for `id`.
    #[must_use]
    pub fn detail_key(&self, id: EntityId) -> ViewKey {
        ViewKey::detail(self.name.clone(), id)
    }
}

// =============================================================================
// Resource Catalog
// =============================================================================

/// The set of resources a registry instantiates synchronizers for.
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    descriptors: Vec<ResourceDescriptor>,
}

impl ResourceCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    /// Adds a descriptor, replacing one with the same name.
    #[must_use]
    pub fn with(mut self, descriptor: ResourceDescriptor) -> Self {
        self.descriptors
            .retain(|existing| existing.name() != descriptor.name());
        self.descriptors.push(descriptor);
        self
    }

    /// The student-council resources.
    #[must_use]
    pub fn council() -> Self {
        Self::new()
            .with(
                ResourceDescriptor::new("water-supplies", "water-supply")
                    .with_required_fields(["vendoId", "quantity"]),
            )
            .with(
                ResourceDescriptor::new("water-vendos", "water-vendo")
                    .with_required_fields(["location"]),
            )
            .with(
                ResourceDescriptor::new("lockers", "locker")
                    .with_merge(MergeStrategy::APPEND)
                    .with_required_fields(["lockerNumber"]),
            )
            .with(
                ResourceDescriptor::new("locker-rentals", "locker-rental")
                    .with_required_fields(["lockerId", "renterName"]),
            )
            .with(
                ResourceDescriptor::new("fund-requests", "fund-request")
                    .with_required_fields(["purpose", "amount"]),
            )
            .with(ResourceDescriptor::new("igps", "igp").with_required_fields(["projectTitle"]))
            .with(
                ResourceDescriptor::new("notifications", "notification")
                    .with_view_prefix(ViewKeyPrefix::lists("unread-notifications"))
                    .with_required_fields(["title", "message"]),
            )
    }

    /// Looks up a descriptor by resource name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.descriptors
            .iter()
            .find(|descriptor| descriptor.name() == name)
    }

    /// Iterates over descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.descriptors.iter()
    }

    /// Resource names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.descriptors.iter().map(ResourceDescriptor::name).collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
