//! Common helpers for integration tests.
//!
//! The `#![allow(dead_code)]` attribute is necessary because every integration
//! test file is compiled as its own crate and uses a different subset of
//! these helpers.

#![allow(dead_code)]

use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::Semaphore;

use mutation_sync::domain::{
    CachedView, Entity, EntityId, FlatView, ListQuery, PageMeta, ResourceDescriptor,
    SegmentedView, SequentialIds, ViewKey,
};
use mutation_sync::error::TransportError;
use mutation_sync::infrastructure::{
    CacheStore, CountingRevalidator, InMemoryCacheStore, InMemoryTransport, Transport,
    TransportFuture,
};
use mutation_sync::sync::{RollbackPolicy, SyncOptions, Synchronizer};

// =============================================================================
// Data helpers
// =============================================================================

/// Entity with only an id.
pub fn entity(id: &str) -> Entity {
    Entity::new(EntityId::new(id), Map::new())
}

/// JSON object literal as a payload.
pub fn payload(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Flat view of bare entities.
pub fn flat(ids: &[&str], page: u64, limit: u64, total_items: u64) -> CachedView {
    CachedView::Flat(FlatView::new(
        ids.iter().map(|id| entity(id)).collect(),
        PageMeta::new(page, limit, total_items),
    ))
}

/// Segmented view; each segment is `(ids, page)` with a shared limit and total.
pub fn segmented(segments: &[(&[&str], u64)], limit: u64, total_items: u64) -> CachedView {
    let pages = segments
        .iter()
        .map(|(ids, page)| {
            FlatView::new(
                ids.iter().map(|id| entity(id)).collect(),
                PageMeta::new(*page, limit, total_items),
            )
        })
        .collect();
    CachedView::Segmented(SegmentedView::new(pages))
}

/// List key for `resource` at `page` with the default limit.
pub fn list_key(resource: &str, page: u64) -> ViewKey {
    ViewKey::list(resource, &ListQuery::new(page, 10))
}

/// Infinite key for `resource` with the default query.
pub fn infinite_key(resource: &str) -> ViewKey {
    ViewKey::infinite(resource, &ListQuery::default())
}

/// Ids of a view in display order.
pub fn ids_of(view: &CachedView) -> Vec<String> {
    view.entities().map(|entity| entity.id.to_string()).collect()
}

// =============================================================================
// Gated transport
// =============================================================================

/// Transport whose writes wait for [`GatedTransport::release`] before reaching
/// the in-memory backend. Reads pass straight through.
#[derive(Clone)]
pub struct GatedTransport {
    inner: InMemoryTransport,
    gate: Arc<Semaphore>,
}

impl GatedTransport {
    pub fn new(inner: InMemoryTransport) -> Self {
        Self {
            inner,
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    /// Lets `count` pending or future writes through.
    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }

    fn gated(&self, call: TransportFuture) -> TransportFuture {
        let gate = Arc::clone(&self.gate);
        async move {
            let permit = gate
                .acquire()
                .await
                .map_err(|error| TransportError::ConnectionFailed(error.to_string()))?;
            permit.forget();
            call.await
        }
        .boxed()
    }
}

impl Transport for GatedTransport {
    fn create(&self, endpoint: &str, payload: &Map<String, Value>) -> TransportFuture {
        self.gated(self.inner.create(endpoint, payload))
    }

    fn update(&self, endpoint: &str, id: &EntityId, payload: &Map<String, Value>) -> TransportFuture {
        self.gated(self.inner.update(endpoint, id, payload))
    }

    fn delete(&self, endpoint: &str, id: &EntityId) -> TransportFuture {
        self.gated(self.inner.delete(endpoint, id))
    }

    fn find_many(&self, endpoint: &str, query: &ListQuery) -> TransportFuture {
        self.inner.find_many(endpoint, query)
    }

    fn find_by_id(&self, endpoint: &str, id: &EntityId) -> TransportFuture {
        self.inner.find_by_id(endpoint, id)
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

/// Lets spawned tasks run until they block.
pub async fn settle_tasks() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A synchronizer over an in-memory cache and backend.
pub struct Harness {
    pub cache: InMemoryCacheStore,
    pub backend: InMemoryTransport,
    pub revalidator: CountingRevalidator,
    pub sync: Synchronizer,
}

impl Harness {
    /// Harness with sequential backend ids ("1", "2", ...) and provisional
    /// ids ("temp-1", "temp-2", ...).
    pub fn new(descriptor: ResourceDescriptor) -> Self {
        Self::with_policy(descriptor, RollbackPolicy::Overwrite)
    }

    pub fn with_policy(descriptor: ResourceDescriptor, policy: RollbackPolicy) -> Self {
        Self::build(descriptor, policy, |backend| {
            Arc::new(backend.clone()) as Arc<dyn Transport>
        })
    }

    /// Harness whose writes are gated; returns the gate alongside.
    pub fn gated(descriptor: ResourceDescriptor, policy: RollbackPolicy) -> (Self, GatedTransport) {
        let backend = InMemoryTransport::with_sequential_ids();
        let gate = GatedTransport::new(backend.clone());
        let transport: Arc<dyn Transport> = Arc::new(gate.clone());
        (Self::assemble(descriptor, policy, backend, transport), gate)
    }

    pub fn build(
        descriptor: ResourceDescriptor,
        policy: RollbackPolicy,
        transport: impl FnOnce(&InMemoryTransport) -> Arc<dyn Transport>,
    ) -> Self {
        let backend = InMemoryTransport::with_sequential_ids();
        let transport = transport(&backend);
        Self::assemble(descriptor, policy, backend, transport)
    }

    fn assemble(
        descriptor: ResourceDescriptor,
        policy: RollbackPolicy,
        backend: InMemoryTransport,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let cache = InMemoryCacheStore::new();
        let revalidator = CountingRevalidator::new();
        let options = SyncOptions::default()
            .with_rollback_policy(policy)
            .with_ids(Arc::new(SequentialIds::new()))
            .with_revalidator(Arc::new(revalidator.clone()));
        let sync = Synchronizer::new(descriptor, Arc::new(cache.clone()), transport, options);
        Self {
            cache,
            backend,
            revalidator,
            sync,
        }
    }

    /// Puts `view` under `key`.
    pub fn put(&self, key: &ViewKey, view: CachedView) -> Arc<CachedView> {
        let view = Arc::new(view);
        self.cache.set_view(key.clone(), Arc::clone(&view));
        view
    }

    /// Current view under `key`.
    pub fn view(&self, key: &ViewKey) -> Option<Arc<CachedView>> {
        self.cache.view(key)
    }
}

/// The descriptor most tests use.
pub fn igps() -> ResourceDescriptor {
    ResourceDescriptor::new("igps", "igp")
}
