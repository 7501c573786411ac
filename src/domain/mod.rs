//! Domain model: entities, cached views, resource descriptors and approval
//! workflows.

pub mod entity;
pub mod resource;
pub mod view;
pub mod workflow;

pub use entity::{
    Entity, EntityId, PROVISIONAL_PREFIX, ProvisionalIdGenerator, ProvisionalIdStrategy,
    SequentialIds, TimestampIds, UniqueIds, generator_for,
};
pub use resource::{
    Collapse, MergeStrategy, Placement, ResourceCatalog, ResourceDescriptor, UpdateMode,
};
pub use view::{
    CachedView, FlatView, ListQuery, PageMeta, SegmentedView, ViewKey, ViewKeyPrefix, ViewKind,
    ViewKindTag, total_pages_for,
};
pub use workflow::{FundRequestStatus, IgpStatus, StatusMachine, check_transition};
