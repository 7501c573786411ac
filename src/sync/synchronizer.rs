//! Per-resource synchronizer.
//!
//! A [`Synchronizer`] runs the whole optimistic protocol for one resource:
//!
//! 1. validate the request (refusals never touch the cache)
//! 2. cancel in-flight reads and capture snapshots
//! 3. write the optimistic projection
//! 4. dispatch exactly one transport call
//! 5. reconcile on success, roll back on failure
//! 6. settle
//!
//! Steps 2 and 3 run without suspending, so no read can land between capture
//! and apply. Nothing serializes overlapping mutations against the same
//! resource; under [`RollbackPolicy::Overwrite`] a late failure may restore
//! over another mutation's success.
//!
//! It also owns the reads that populate the cache, so read results can be
//! discarded when a mutation starts while they are in flight.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::Instrument;

use crate::config::SyncConfig;
use crate::domain::{
    CachedView, Entity, EntityId, FlatView, ListQuery, ProvisionalIdGenerator, ResourceDescriptor,
    SegmentedView, StatusMachine, UniqueIds, ViewKey, ViewKeyPrefix, check_transition,
    generator_for,
};
use crate::error::{SyncError, TransportError, ValidationError};
use crate::infrastructure::{
    CacheStore, HttpRevalidator, NoopRevalidator, ReadTicket, Revalidator, Transport,
};

use super::dispatcher::MutationDispatcher;
use super::mutation::{MutationContext, MutationOutcome, MutationPhase, MutationRequest, Operation};
use super::projector::{Change, OptimisticProjector, Projection};
use super::reconciler::Reconciler;
use super::rollback::{RollbackHandler, RollbackPolicy, RollbackReport};
use super::settlement::SettlementTrigger;
use super::snapshot::{SnapshotManager, SnapshotSet, ViewSelection};

// =============================================================================
// Options
// =============================================================================

/// Collaborators and policies shared by every synchronizer of a registry.
#[derive(Clone)]
pub struct SyncOptions {
    /// Rollback policy.
    pub rollback_policy: RollbackPolicy,
    /// Provisional id source.
    pub ids: Arc<dyn ProvisionalIdGenerator>,
    /// Settlement revalidator.
    pub revalidator: Arc<dyn Revalidator>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            rollback_policy: RollbackPolicy::default(),
            ids: Arc::new(UniqueIds),
            revalidator: Arc::new(NoopRevalidator),
        }
    }
}

impl SyncOptions {
    /// Builds options from configuration.
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        let revalidator: Arc<dyn Revalidator> = match &config.revalidate_url {
            Some(url) => Arc::new(HttpRevalidator::new(url.clone(), config.timeout)),
            None => Arc::new(NoopRevalidator),
        };
        Self {
            rollback_policy: config.rollback_policy,
            ids: Arc::from(generator_for(config.provisional_ids)),
            revalidator,
        }
    }

    /// Sets the rollback policy.
    #[must_use]
    pub const fn with_rollback_policy(mut self, policy: RollbackPolicy) -> Self {
        self.rollback_policy = policy;
        self
    }

    /// Sets the provisional id source.
    #[must_use]
    pub fn with_ids(mut self, ids: Arc<dyn ProvisionalIdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Sets the settlement revalidator.
    #[must_use]
    pub fn with_revalidator(mut self, revalidator: Arc<dyn Revalidator>) -> Self {
        self.revalidator = revalidator;
        self
    }
}

impl std::fmt::Debug for SyncOptions {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncOptions")
            .field("rollback_policy", &self.rollback_policy)
            .field("revalidate", &self.revalidator.is_enabled())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Synchronizer
// =============================================================================

/// Keys written while a mutation ran.
#[derive(Debug, Default)]
struct Written {
    keys: Vec<ViewKey>,
    versions: HashMap<ViewKey, u64>,
}

impl Written {
    fn record(&mut self, key: ViewKey, version: u64) {
        if !self.versions.contains_key(&key) {
            self.keys.push(key.clone());
        }
        self.versions.insert(key, version);
    }
}

/// Optimistic mutation protocol for one resource.
#[derive(Clone)]
pub struct Synchronizer {
    descriptor: ResourceDescriptor,
    cache: Arc<dyn CacheStore>,
    transport: Arc<dyn Transport>,
    dispatcher: MutationDispatcher,
    settlement: SettlementTrigger,
    ids: Arc<dyn ProvisionalIdGenerator>,
    rollback_policy: RollbackPolicy,
}

impl Synchronizer {
    /// Creates a synchronizer for `descriptor`.
    #[must_use]
    pub fn new(
        descriptor: ResourceDescriptor,
        cache: Arc<dyn CacheStore>,
        transport: Arc<dyn Transport>,
        options: SyncOptions,
    ) -> Self {
        Self {
            dispatcher: MutationDispatcher::new(Arc::clone(&transport), &descriptor),
            settlement: SettlementTrigger::new(options.revalidator),
            ids: options.ids,
            rollback_policy: options.rollback_policy,
            descriptor,
            cache,
            transport,
        }
    }

    /// Resource descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    /// Shared cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Creates an entity; returns the server's copy.
    ///
    /// # Errors
    ///
    /// Returns the mutation's error after the cache has been rolled back.
    pub async fn create(&self, payload: Map<String, Value>) -> Result<Entity, SyncError> {
        let outcome = self.mutate(MutationRequest::create(payload)).await;
        self.expect_entity(outcome)
    }

    /// Updates an entity; returns the server's copy.
    ///
    /// # Errors
    ///
    /// Returns the mutation's error after the cache has been rolled back.
    pub async fn update(
        &self,
        id: EntityId,
        payload: Map<String, Value>,
    ) -> Result<Entity, SyncError> {
        let outcome = self.mutate(MutationRequest::update(id, payload)).await;
        self.expect_entity(outcome)
    }

    /// Deletes an entity.
    ///
    /// # Errors
    ///
    /// Returns the mutation's error after the cache has been rolled back.
    pub async fn delete(&self, id: EntityId) -> Result<(), SyncError> {
        self.mutate(MutationRequest::delete(id)).await.result.map(|_| ())
    }

    /// Moves an approval workflow from `from` to `to` by updating `status`.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Validation`] if the workflow belongs to another resource
    /// - [`SyncError::InvalidTransition`] if the table forbids the move
    ///
    /// Neither refusal touches the cache. Otherwise as [`Self::update`].
    pub async fn transition<S: StatusMachine>(
        &self,
        id: EntityId,
        from: S,
        to: S,
    ) -> Result<Entity, SyncError> {
        if self.descriptor.name() != S::RESOURCE {
            return Err(ValidationError::single(
                "status",
                format!(
                    "the {} workflow does not apply to {}",
                    S::WORKFLOW,
                    self.descriptor.name()
                ),
            )
            .into());
        }
        let to = check_transition(from, to)?;

        let mut payload = Map::new();
        payload.insert("status".to_string(), Value::String(to.to_string()));
        self.update(id, payload).await
    }

    /// Runs one mutation through the full protocol.
    pub async fn mutate(&self, request: MutationRequest) -> MutationOutcome {
        let context = MutationContext::new(self.descriptor.name(), request);
        let span = tracing::info_span!(
            "mutation",
            resource = %self.descriptor.name(),
            mutation_id = %context.id(),
            operation = %context.request().operation(),
        );
        self.run(context).instrument(span).await
    }

    async fn run(&self, mut context: MutationContext) -> MutationOutcome {
        if let Err(error) = context.request().validate(&self.descriptor) {
            tracing::debug!(%error, "Refused mutation");
            context.advance(MutationPhase::Settled);
            return finish(
                context,
                Err(error.into()),
                Written::default(),
                Vec::new(),
                RollbackReport::default(),
            );
        }

        context.advance(MutationPhase::Pending);
        let (snapshots, optimistic) = self.apply_optimistic(&mut context);
        context.advance(MutationPhase::OptimisticApplied);

        let dispatched = self.dispatcher.dispatch(context.request()).await;

        let (result, reconciled, rolled_back) = match dispatched {
            Ok(entity) => {
                context.advance(MutationPhase::Succeeded);
                let reconciled = self.reconcile(&context, entity.as_ref());
                context.advance(MutationPhase::Reconciled);
                (Ok(entity), reconciled, RollbackReport::default())
            }
            Err(error) => {
                context.advance(MutationPhase::Failed);
                tracing::warn!(%error, "Mutation failed");
                let report = RollbackHandler::rollback(
                    self.cache.as_ref(),
                    &snapshots,
                    &optimistic.versions,
                    self.rollback_policy,
                );
                context.advance(MutationPhase::RolledBack);
                (Err(error), Vec::new(), report)
            }
        };

        self.settlement.settle().await;
        context.advance(MutationPhase::Settled);
        finish(context, result, optimistic, reconciled, rolled_back)
    }

    /// Captures and projects without suspending.
    fn apply_optimistic(&self, context: &mut MutationContext) -> (SnapshotSet, Written) {
        let request = context.request().clone();
        let mut selection = ViewSelection::prefixes(self.descriptor.view_prefixes());
        if let Some(id) = request.target() {
            selection = selection.with_key(self.descriptor.detail_key(id.clone()));
        }
        let snapshots = SnapshotManager::capture(self.cache.as_ref(), context.id(), &selection);

        let provisional = match request.operation() {
            Operation::Create => Some(Entity::provisional(self.ids.next_id(), request.payload())),
            Operation::Update | Operation::Delete => None,
        };
        let change = match (request.operation(), request.target(), provisional.as_ref()) {
            (Operation::Create, _, Some(entity)) => Some(Change::Create(entity)),
            (Operation::Update, Some(id), _) => Some(Change::Update {
                id,
                patch: request.payload(),
            }),
            (Operation::Delete, Some(id), _) => Some(Change::Delete(id)),
            _ => None,
        };

        let mut written = Written::default();
        if let Some(change) = change {
            let merge = self.descriptor.merge();
            for snapshot in snapshots.snapshots() {
                let Some(view) = snapshot.view() else {
                    continue;
                };
                let projection = OptimisticProjector::project(view, change, merge);
                if let Some(version) = self.write(snapshot.key(), projection) {
                    written.record(snapshot.key().clone(), version);
                }
            }
        }

        if let Some(entity) = provisional {
            tracing::debug!(provisional_id = %entity.id, "Synthesized provisional entity");
            context.set_provisional(entity);
        }
        tracing::debug!(written = written.keys.len(), "Applied optimistic update");
        (snapshots, written)
    }

    fn reconcile(&self, context: &MutationContext, server: Option<&Entity>) -> Vec<ViewKey> {
        let merge = self.descriptor.merge();
        let mut written = Written::default();

        match (context.request().operation(), server) {
            (Operation::Create, Some(server)) => {
                if let Some(provisional) = context.provisional() {
                    for (key, view) in self.collection_views() {
                        let projection =
                            Reconciler::reconcile_create(&view, &provisional.id, server, merge);
                        if let Some(version) = self.write(&key, projection) {
                            written.record(key, version);
                        }
                    }
                }
                self.set_detail(server, &mut written);
            }
            (Operation::Update, Some(server)) => {
                for (key, view) in self.collection_views() {
                    let projection = Reconciler::reconcile_update(&view, server, merge);
                    if let Some(version) = self.write(&key, projection) {
                        written.record(key, version);
                    }
                }
                self.set_detail(server, &mut written);
            }
            (Operation::Delete, _) => {
                if let Some(id) = context.request().target() {
                    for (key, view) in self.collection_views() {
                        let projection = Reconciler::reconcile_delete(&view, id);
                        if let Some(version) = self.write(&key, projection) {
                            written.record(key, version);
                        }
                    }
                }
            }
            (Operation::Create | Operation::Update, None) => {}
        }

        tracing::debug!(reconciled = written.keys.len(), "Reconciled with server response");
        written.keys
    }

    fn set_detail(&self, server: &Entity, written: &mut Written) {
        let key = self.descriptor.detail_key(server.id.clone());
        let version = self
            .cache
            .set_view(key.clone(), Arc::new(CachedView::Single(server.clone())));
        written.record(key, version);
    }

    /// Applies a projection to the cache; returns the new version if written.
    fn write(&self, key: &ViewKey, projection: Projection) -> Option<u64> {
        match projection {
            Projection::Unchanged => None,
            Projection::Updated(view) => Some(self.cache.set_view(key.clone(), Arc::new(view))),
            Projection::Removed => Some(self.cache.remove_view(key)),
        }
    }

    /// Every cached collection view of the resource, each key once.
    fn collection_views(&self) -> Vec<(ViewKey, Arc<CachedView>)> {
        let mut seen = HashSet::new();
        self.descriptor
            .view_prefixes()
            .iter()
            .flat_map(|prefix| self.cache.views_by_prefix(prefix))
            .filter(|(key, _)| seen.insert(key.clone()))
            .collect()
    }

    fn expect_entity(&self, outcome: MutationOutcome) -> Result<Entity, SyncError> {
        outcome.result?.ok_or_else(|| SyncError::ReconciliationConflict {
            resource: self.descriptor.name().to_string(),
            detail: "response carries no entity".to_string(),
        })
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Loads one page into the list view for `query`.
    ///
    /// The result is returned either way but only cached if no mutation
    /// cancelled the read while it was in flight.
    ///
    /// # Errors
    ///
    /// Returns transport failures and undecodable envelopes.
    pub async fn fetch_page(&self, query: &ListQuery) -> Result<FlatView, SyncError> {
        let key = ViewKey::list(self.descriptor.name(), query);
        let ticket = self.cache.begin_read(&key);
        let page = self.read_page(&ticket, query).await?;
        self.publish(&ticket, CachedView::Flat(page.clone()));
        Ok(page)
    }

    /// Loads the next segment of the infinite view for `query`.
    ///
    /// The first call loads page 1. Once the last loaded segment reports no
    /// next page, the view is returned without a request.
    ///
    /// # Errors
    ///
    /// Returns transport failures and undecodable envelopes.
    pub async fn fetch_next_segment(&self, query: &ListQuery) -> Result<SegmentedView, SyncError> {
        let key = ViewKey::infinite(self.descriptor.name(), query);
        let current = match self.cache.view(&key).as_deref() {
            Some(CachedView::Segmented(segmented)) => segmented.clone(),
            _ => SegmentedView::new(Vec::new()),
        };
        let next_page = match current.last_meta().map(|meta| (meta.page, meta.has_next_page)) {
            Some((_, false)) => return Ok(current),
            Some((page, true)) => page + 1,
            None => 1,
        };

        let ticket = self.cache.begin_read(&key);
        let page = self.read_page(&ticket, &query.at_page(next_page)).await?;

        let mut segmented = current;
        if segmented.page_params.len() == segmented.pages.len() {
            segmented.page_params.push(Value::from(next_page));
        }
        segmented.pages.push(page);
        self.publish(&ticket, CachedView::Segmented(segmented.clone()));
        Ok(segmented)
    }

    /// Loads one entity into its detail view.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] for a missing id, other transport
    /// failures, and responses without an id.
    pub async fn fetch_detail(&self, id: &EntityId) -> Result<Entity, SyncError> {
        let key = self.descriptor.detail_key(id.clone());
        let ticket = self.cache.begin_read(&key);
        let body = match self.transport.find_by_id(self.descriptor.endpoint(), id).await {
            Ok(body) => body,
            Err(error) => {
                self.cache.abandon_read(&ticket);
                return Err(error.into());
            }
        };
        let Some(entity) = Entity::from_value(body) else {
            self.cache.abandon_read(&ticket);
            return Err(SyncError::Transport(TransportError::Decode(format!(
                "{} find-by-id response carries no id",
                self.descriptor.endpoint()
            ))));
        };
        self.publish(&ticket, CachedView::Single(entity.clone()));
        Ok(entity)
    }

    /// Drops every cached view of the resource and discards in-flight reads;
    /// returns how many views were removed.
    pub fn invalidate(&self) -> usize {
        let mut prefixes = self.descriptor.view_prefixes().to_vec();
        prefixes.push(ViewKeyPrefix::details(self.descriptor.name()));

        let mut removed = HashSet::new();
        for prefix in &prefixes {
            self.cache.cancel_in_flight(prefix);
            for (key, _) in self.cache.views_by_prefix(prefix) {
                self.cache.remove_view(&key);
                removed.insert(key);
            }
        }
        tracing::debug!(resource = %self.descriptor.name(), removed = removed.len(), "Invalidated views");
        removed.len()
    }

    async fn read_page(&self, ticket: &ReadTicket, query: &ListQuery) -> Result<FlatView, SyncError> {
        let body = match self.transport.find_many(self.descriptor.endpoint(), query).await {
            Ok(body) => body,
            Err(error) => {
                self.cache.abandon_read(ticket);
                return Err(error.into());
            }
        };
        serde_json::from_value(body).map_err(|error| {
            self.cache.abandon_read(ticket);
            SyncError::Transport(TransportError::Decode(error.to_string()))
        })
    }

    fn publish(&self, ticket: &ReadTicket, view: CachedView) {
        if !self.cache.complete_read(ticket, view) {
            tracing::debug!(key = %ticket.key(), "Read superseded by a mutation");
        }
    }
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Synchronizer")
            .field("resource", &self.descriptor.name())
            .field("transport", &self.transport.name())
            .field("rollback_policy", &self.rollback_policy)
            .finish_non_exhaustive()
    }
}

fn finish(
    context: MutationContext,
    result: Result<Option<Entity>, SyncError>,
    optimistic: Written,
    reconciled: Vec<ViewKey>,
    rollback: RollbackReport,
) -> MutationOutcome {
    MutationOutcome {
        mutation_id: context.id(),
        resource: context.resource().to_string(),
        operation: context.request().operation(),
        provisional_id: context.provisional().map(|entity| entity.id.clone()),
        phases: context.phases().to_vec(),
        optimistic_keys: optimistic.keys,
        reconciled_keys: reconciled,
        restored_keys: rollback.restored,
        skipped_keys: rollback.skipped,
        result,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FundRequestStatus, IgpStatus, PageMeta, SequentialIds};
    use crate::infrastructure::{
        CountingRevalidator, InMemoryCacheStore, InMemoryTransport, ScriptedWrite,
    };
    use rstest::rstest;
    use serde_json::json;

    struct Harness {
        cache: InMemoryCacheStore,
        backend: InMemoryTransport,
        revalidator: CountingRevalidator,
        sync: Synchronizer,
    }

    fn harness(descriptor: ResourceDescriptor) -> Harness {
        let cache = InMemoryCacheStore::new();
        let backend = InMemoryTransport::with_sequential_ids();
        let revalidator = CountingRevalidator::new();
        let options = SyncOptions::default()
            .with_ids(Arc::new(SequentialIds::new()))
            .with_revalidator(Arc::new(revalidator.clone()));
        let sync = Synchronizer::new(
            descriptor,
            Arc::new(cache.clone()),
            Arc::new(backend.clone()),
            options,
        );
        Harness {
            cache,
            backend,
            revalidator,
            sync,
        }
    }

    fn igps() -> ResourceDescriptor {
        ResourceDescriptor::new("igps", "igp").with_required_fields(["projectTitle"])
    }

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn seed_list(cache: &InMemoryCacheStore, ids: &[&str]) -> ViewKey {
        let key = ViewKey::list("igps", &ListQuery::default());
        let data = ids
            .iter()
            .map(|id| Entity::new(EntityId::new(*id), Map::new()))
            .collect();
        let total = ids.len() as u64;
        cache.set_view(
            key.clone(),
            Arc::new(CachedView::Flat(FlatView::new(data, PageMeta::new(1, 10, total)))),
        );
        key
    }

    #[rstest]
    #[tokio::test]
    async fn test_successful_create_walks_the_success_path() {
        let h = harness(igps());
        let key = seed_list(&h.cache, &["a"]);

        let outcome = h
            .sync
            .mutate(MutationRequest::create(payload(json!({"projectTitle": "Bake sale"}))))
            .await;

        assert_eq!(
            outcome.phases,
            vec![
                MutationPhase::Idle,
                MutationPhase::Pending,
                MutationPhase::OptimisticApplied,
                MutationPhase::Succeeded,
                MutationPhase::Reconciled,
                MutationPhase::Settled,
            ]
        );
        assert_eq!(outcome.provisional_id, Some(EntityId::new("temp-1")));
        assert_eq!(outcome.optimistic_keys, vec![key.clone()]);

        let view = h.cache.view(&key).unwrap();
        let ids: Vec<&str> = view.entities().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "a"]);
        assert!(h.cache.view(&ViewKey::detail("igps", EntityId::new("1"))).is_some());
        assert_eq!(h.revalidator.calls(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_failed_update_restores_snapshot() {
        let h = harness(igps());
        let key = seed_list(&h.cache, &["a"]);
        let before = h.cache.view(&key).unwrap();
        h.backend
            .script_next_write(ScriptedWrite::Fail(TransportError::Timeout(100)))
            .await;

        let result = h
            .sync
            .update(EntityId::new("a"), payload(json!({"projectTitle": "renamed"})))
            .await;

        assert_eq!(result, Err(SyncError::Transport(TransportError::Timeout(100))));
        assert!(Arc::ptr_eq(&h.cache.view(&key).unwrap(), &before));
        assert_eq!(h.revalidator.calls(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn test_refused_mutation_touches_nothing() {
        let h = harness(igps());
        let key = seed_list(&h.cache, &["a"]);
        let version = h.cache.version(&key);

        let outcome = h.sync.mutate(MutationRequest::create(Map::new())).await;

        assert!(matches!(outcome.result, Err(SyncError::Validation(_))));
        assert_eq!(outcome.phases, vec![MutationPhase::Idle, MutationPhase::Settled]);
        assert_eq!(h.cache.version(&key), version);
        assert!(h.backend.calls().await.is_empty());
        assert_eq!(h.revalidator.calls(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn test_delete_removes_detail_view() {
        let h = harness(igps());
        h.backend
            .seed("igp", vec![Entity::new(EntityId::new("a"), Map::new())])
            .await;
        seed_list(&h.cache, &["a"]);
        h.sync.fetch_detail(&EntityId::new("a")).await.unwrap();

        h.sync.delete(EntityId::new("a")).await.unwrap();

        assert!(h.cache.view(&ViewKey::detail("igps", EntityId::new("a"))).is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn test_transition_validates_before_dispatch() {
        let h = harness(igps());
        let refused = h
            .sync
            .transition(EntityId::new("a"), IgpStatus::Pending, IgpStatus::Completed)
            .await;
        assert!(matches!(refused, Err(SyncError::InvalidTransition { .. })));

        let wrong_resource = h
            .sync
            .transition(EntityId::new("a"), FundRequestStatus::Pending, FundRequestStatus::Approved)
            .await;
        assert!(matches!(wrong_resource, Err(SyncError::Validation(_))));
        assert!(h.backend.calls().await.is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn test_transition_updates_status() {
        let h = harness(igps());
        h.backend
            .seed(
                "igp",
                vec![Entity::from_value(json!({"id": "a", "status": "pending"})).unwrap()],
            )
            .await;

        let entity = h
            .sync
            .transition(EntityId::new("a"), IgpStatus::Pending, IgpStatus::Approved)
            .await
            .unwrap();
        assert_eq!(entity.field("status"), Some(&json!("approved")));
    }

    #[rstest]
    #[tokio::test]
    async fn test_fetch_next_segment_appends_until_exhausted() {
        let h = harness(igps());
        h.backend
            .seed(
                "igp",
                vec![
                    Entity::new(EntityId::new("b"), Map::new()),
                    Entity::new(EntityId::new("a"), Map::new()),
                ],
            )
            .await;
        let query = ListQuery::new(1, 1);

        let first = h.sync.fetch_next_segment(&query).await.unwrap();
        assert_eq!(first.pages.len(), 1);
        let second = h.sync.fetch_next_segment(&query).await.unwrap();
        assert_eq!(second.pages.len(), 2);
        assert_eq!(second.page_params, vec![json!(1), json!(2)]);

        let calls = h.backend.calls().await.len();
        let third = h.sync.fetch_next_segment(&query).await.unwrap();
        assert_eq!(third, second);
        assert_eq!(h.backend.calls().await.len(), calls);
    }

    #[rstest]
    #[tokio::test]
    async fn test_invalidate_drops_every_view() {
        let h = harness(igps());
        seed_list(&h.cache, &["a"]);
        h.cache.set_view(
            ViewKey::detail("igps", EntityId::new("a")),
            Arc::new(CachedView::Opaque(Value::Null)),
        );
        assert_eq!(h.sync.invalidate(), 2);
        assert!(h.cache.is_empty());
    }
}
