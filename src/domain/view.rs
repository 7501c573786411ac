//! Cached view model.
//!
//! A cached view is a read result held client-side, identified by a
//! [`ViewKey`] of (resource name, view kind, filter parameters). Three shapes
//! are recognized:
//!
//! - **Flat paginated**: `{ data: Entity[], meta: PageMeta }`
//! - **Segmented / infinite**: `{ pages: FlatView[] }`
//! - **Single entity**: the entity object itself
//!
//! Anything else, including a view that has not loaded yet, is kept verbatim
//! as [`CachedView::Opaque`] and passes through projection untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use super::entity::{Entity, EntityId};

// =============================================================================
// Page Meta
// =============================================================================

/// Pagination envelope metadata.
///
/// `page` is 1-indexed. After any synchronizer write the following hold:
/// `total_pages == max(1, ceil(total_items / limit))`,
/// `has_next_page == (page < total_pages)` and `has_prev_page == (page > 1)`.
/// Metadata received from the server is stored as-is until touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    /// Current page (1-indexed).
    pub page: u64,
    /// Items per page.
    pub limit: u64,
    /// Total items across all pages.
    pub total_items: u64,
    /// Total number of pages.
    pub total_pages: u64,
    /// Whether a following page exists.
    pub has_next_page: bool,
    /// Whether a preceding page exists.
    pub has_prev_page: bool,
}

impl PageMeta {
    /// Creates metadata with every derived field computed.
    #[must_use]
    pub const fn new(page: u64, limit: u64, total_items: u64) -> Self {
        let total_pages = total_pages_for(total_items, limit);
        Self {
            page,
            limit,
            total_items,
            total_pages,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        }
    }

    /// Returns a copy with a new item count and derived fields recomputed.
    #[must_use]
    pub const fn with_total_items(&self, total_items: u64) -> Self {
        Self::new(self.page, self.limit, total_items)
    }

    /// One more item.
    #[must_use]
    pub const fn incremented(&self) -> Self {
        self.with_total_items(self.total_items.saturating_add(1))
    }

    /// One fewer item, never below zero.
    #[must_use]
    pub const fn decremented(&self) -> Self {
        self.with_total_items(self.total_items.saturating_sub(1))
    }

    /// Returns true if the derived fields agree with `page`, `limit` and
    /// `total_items`.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        let expected = Self::new(self.page, self.limit, self.total_items);
        self.total_pages == expected.total_pages
            && self.has_next_page == expected.has_next_page
            && self.has_prev_page == expected.has_prev_page
    }

    /// Returns true for the first page.
    #[must_use]
    pub const fn is_first_page(&self) -> bool {
        self.page <= 1
    }
}

/// `max(1, ceil(total / limit))`; a zero limit counts as one page.
#[must_use]
pub const fn total_pages_for(total_items: u64, limit: u64) -> u64 {
    if limit == 0 {
        return 1;
    }
    let pages = total_items.div_ceil(limit);
    if pages == 0 { 1 } else { pages }
}

// =============================================================================
// View Shapes
// =============================================================================

/// A flat paginated view: one page of entities plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatView {
    /// Entities on this page.
    pub data: Vec<Entity>,
    /// Pagination metadata.
    pub meta: PageMeta,
}

impl FlatView {
    /// Creates a flat view.
    #[must_use]
    pub const fn new(data: Vec<Entity>, meta: PageMeta) -> Self {
        Self { data, meta }
    }

    /// Returns true if an entity with `id` is on this page.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.data.iter().any(|entity| &entity.id == id)
    }
}

/// A segmented (infinite-scroll) view: pages in load order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentedView {
    /// Loaded segments, first segment first.
    pub pages: Vec<FlatView>,
    /// Page parameters used to fetch each segment, if the cache records them.
    #[serde(
        default,
        rename = "pageParams",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub page_params: Vec<Value>,
}

impl SegmentedView {
    /// Creates a segmented view without recorded page parameters.
    #[must_use]
    pub const fn new(pages: Vec<FlatView>) -> Self {
        Self {
            pages,
            page_params: Vec::new(),
        }
    }

    /// Returns the last loaded segment's metadata.
    #[must_use]
    pub fn last_meta(&self) -> Option<&PageMeta> {
        self.pages.last().map(|segment| &segment.meta)
    }
}

/// A cached read result.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedView {
    /// `{ data, meta }`.
    Flat(FlatView),
    /// `{ pages: [...] }`.
    Segmented(SegmentedView),
    /// A single entity.
    Single(Entity),
    /// Not loaded yet or an unrecognized shape; never projected.
    Opaque(Value),
}

impl CachedView {
    /// Classifies a raw JSON value into one of the known shapes.
    ///
    /// Values that look like a known shape but fail to decode are kept as
    /// [`CachedView::Opaque`].
    #[must_use]
    pub fn from_value(value: Value) -> Self {
        let shape = match &value {
            Value::Object(object) if object.get("pages").is_some_and(Value::is_array) => {
                Shape::Segmented
            }
            Value::Object(object)
                if object.get("data").is_some_and(Value::is_array)
                    && object.get("meta").is_some_and(Value::is_object) =>
            {
                Shape::Flat
            }
            Value::Object(object) if object.contains_key("id") => Shape::Single,
            _ => Shape::Unknown,
        };

        match shape {
            Shape::Segmented => serde_json::from_value(value.clone())
                .map_or(Self::Opaque(value), Self::Segmented),
            Shape::Flat => {
                serde_json::from_value(value.clone()).map_or(Self::Opaque(value), Self::Flat)
            }
            Shape::Single => Entity::from_value(value.clone()).map_or(Self::Opaque(value), Self::Single),
            Shape::Unknown => Self::Opaque(value),
        }
    }

    /// Converts the view back to JSON.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Returns true unless the view is opaque.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        !matches!(self, Self::Opaque(_))
    }

    /// Iterates over every entity held by the view.
    pub fn entities(&self) -> Box<dyn Iterator<Item = &Entity> + '_> {
        match self {
            Self::Flat(view) => Box::new(view.data.iter()),
            Self::Segmented(view) => Box::new(view.pages.iter().flat_map(|page| page.data.iter())),
            Self::Single(entity) => Box::new(std::iter::once(entity)),
            Self::Opaque(_) => Box::new(std::iter::empty()),
        }
    }

    /// Returns true if any entity in the view has `id`.
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities().any(|entity| &entity.id == id)
    }

    /// Returns every page metadata block the view carries.
    #[must_use]
    pub fn metas(&self) -> Vec<&PageMeta> {
        match self {
            Self::Flat(view) => vec![&view.meta],
            Self::Segmented(view) => view.pages.iter().map(|page| &page.meta).collect(),
            Self::Single(_) | Self::Opaque(_) => Vec::new(),
        }
    }
}

enum Shape {
    Segmented,
    Flat,
    Single,
    Unknown,
}

impl Serialize for CachedView {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Flat(view) => view.serialize(serializer),
            Self::Segmented(view) => view.serialize(serializer),
            Self::Single(entity) => entity.serialize(serializer),
            Self::Opaque(value) => value.serialize(serializer),
        }
    }
}

// =============================================================================
// List Query
// =============================================================================

/// Parameters of a paginated list read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListQuery {
    /// Page (1-indexed).
    pub page: u64,
    /// Items per page.
    pub limit: u64,
    /// Additional filters, e.g. `status=pending`.
    pub filters: BTreeMap<String, String>,
}

impl ListQuery {
    /// Creates a query without filters.
    #[must_use]
    pub const fn new(page: u64, limit: u64) -> Self {
        Self {
            page,
            limit,
            filters: BTreeMap::new(),
        }
    }

    /// Adds a filter.
    #[must_use]
    pub fn with_filter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.insert(name.into(), value.into());
        self
    }

    /// Returns the same query pointed at another page.
    #[must_use]
    pub fn at_page(&self, page: u64) -> Self {
        Self {
            page,
            limit: self.limit,
            filters: self.filters.clone(),
        }
    }

    /// Query-string pairs, `page` and `limit` first.
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_string(), self.page.to_string()),
            ("limit".to_string(), self.limit.to_string()),
        ];
        pairs.extend(
            self.filters
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        pairs
    }
}

impl Default for ListQuery {
    fn default() -> Self {
        Self::new(1, 10)
    }
}

// =============================================================================
// View Keys
// =============================================================================

/// What kind of read a view holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViewKind {
    /// A flat paginated list.
    List,
    /// A segmented infinite-scroll list.
    Infinite,
    /// A single entity by id.
    Detail(EntityId),
}

/// Tag of a [`ViewKind`] without its payload, used for prefix matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKindTag {
    /// Matches [`ViewKind::List`].
    List,
    /// Matches [`ViewKind::Infinite`].
    Infinite,
    /// Matches any [`ViewKind::Detail`].
    Detail,
}

impl ViewKind {
    /// Returns the payload-free tag.
    #[must_use]
    pub const fn tag(&self) -> ViewKindTag {
        match self {
            Self::List => ViewKindTag::List,
            Self::Infinite => ViewKindTag::Infinite,
            Self::Detail(_) => ViewKindTag::Detail,
        }
    }
}

/// Identity of a cached view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewKey {
    resource: String,
    kind: ViewKind,
    params: BTreeMap<String, String>,
}

impl ViewKey {
    /// Key of a flat paginated list read.
    #[must_use]
    pub fn list(resource: impl Into<String>, query: &ListQuery) -> Self {
        Self {
            resource: resource.into(),
            kind: ViewKind::List,
            params: query.to_pairs().into_iter().collect(),
        }
    }

    /// Key of an infinite read; segments share one key, so `page` is omitted.
    #[must_use]
    pub fn infinite(resource: impl Into<String>, query: &ListQuery) -> Self {
        let mut params: BTreeMap<String, String> = query.filters.clone();
        params.insert("limit".to_string(), query.limit.to_string());
        Self {
            resource: resource.into(),
            kind: ViewKind::Infinite,
            params,
        }
    }

    /// Key of a single-entity read.
    #[must_use]
    pub fn detail(resource: impl Into<String>, id: EntityId) -> Self {
        Self {
            resource: resource.into(),
            kind: ViewKind::Detail(id),
            params: BTreeMap::new(),
        }
    }

    /// Resource name.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// View kind.
    #[must_use]
    pub const fn kind(&self) -> &ViewKind {
        &self.kind
    }

    /// Filter parameters.
    #[must_use]
    pub const fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Returns true for single-entity keys.
    #[must_use]
    pub const fn is_detail(&self) -> bool {
        matches!(self.kind, ViewKind::Detail(_))
    }
}

impl std::fmt::Display for ViewKey {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ViewKind::List => write!(formatter, "{}:list", self.resource)?,
            ViewKind::Infinite => write!(formatter, "{}:infinite", self.resource)?,
            ViewKind::Detail(id) => write!(formatter, "{}:detail:{id}", self.resource)?,
        }
        for (index, (name, value)) in self.params.iter().enumerate() {
            let separator = if index == 0 { '?' } else { '&' };
            write!(formatter, "{separator}{name}={value}")?;
        }
        Ok(())
    }
}

/// Selects every view key of one resource, optionally of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewKeyPrefix {
    resource: String,
    kind: Option<ViewKindTag>,
}

impl ViewKeyPrefix {
    /// Every view of `resource`.
    #[must_use]
    pub fn resource(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            kind: None,
        }
    }

    /// Every flat list view of `resource`.
    #[must_use]
    pub fn lists(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            kind: Some(ViewKindTag::List),
        }
    }

    /// Every infinite view of `resource`.
    #[must_use]
    pub fn infinite(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            kind: Some(ViewKindTag::Infinite),
        }
    }

    /// Every single-entity view of `resource`.
    #[must_use]
    pub fn details(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            kind: Some(ViewKindTag::Detail),
        }
    }

    /// Resource name.
    #[must_use]
    pub fn resource_name(&self) -> &str {
        &self.resource
    }

    /// Returns true if `key` falls under this prefix.
    #[must_use]
    pub fn matches(&self, key: &ViewKey) -> bool {
        key.resource == self.resource && self.kind.is_none_or(|kind| kind == key.kind.tag())
    }
}

impl std::fmt::Display for ViewKeyPrefix {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            None => write!(formatter, "{}:*", self.resource),
            Some(ViewKindTag::List) => write!(formatter, "{}:list*", self.resource),
            Some(ViewKindTag::Infinite) => write!(formatter, "{}:infinite*", self.resource),
            Some(ViewKindTag::Detail) => write!(formatter, "{}:detail*", self.resource),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
