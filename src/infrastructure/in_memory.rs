//! In-process backend.
//!
//! [`InMemoryTransport`] plays the server side of the [`Transport`] port: it
//! assigns ids, stamps timestamps, paginates and filters. It is used by the
//! CLI's `memory` backend and throughout the tests.
//!
//! Writes can be scripted to fail or to answer with an arbitrary body, which
//! is how tests drive the rollback and reconciliation-conflict paths.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use futures::FutureExt;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::transport::{Transport, TransportFuture};
use crate::domain::{Entity, EntityId, FlatView, ListQuery, PageMeta};
use crate::error::TransportError;

// =============================================================================
// Scripted Responses
// =============================================================================

/// Overrides the outcome of the next write.
#[derive(Debug, Clone)]
pub enum ScriptedWrite {
    /// Fail without touching the store.
    Fail(TransportError),
    /// Apply nothing and answer with this body.
    Respond(Value),
}

/// Which kind of call reached the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// `create`.
    Create,
    /// `update`.
    Update,
    /// `delete`.
    Delete,
    /// `find_many`.
    FindMany,
    /// `find_by_id`.
    FindById,
}

// =============================================================================
// Backend State
// =============================================================================

#[derive(Debug, Default)]
struct BackendState {
    /// Entities per endpoint, newest first.
    tables: HashMap<String, Vec<Entity>>,
    scripted: VecDeque<ScriptedWrite>,
    calls: Vec<(CallKind, String)>,
}

#[derive(Debug)]
enum IdMode {
    Uuid,
    Sequential(AtomicU64),
}

/// In-memory implementation of [`Transport`].
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    state: Arc<RwLock<BackendState>>,
    ids: Arc<IdMode>,
}

impl InMemoryTransport {
    /// Creates an empty backend that assigns UUID v7 ids.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(BackendState::default())),
            ids: Arc::new(IdMode::Uuid),
        }
    }

    /// Creates an empty backend that assigns ids `1`, `2`, ...
    #[must_use]
    pub fn with_sequential_ids() -> Self {
        Self {
            state: Arc::new(RwLock::new(BackendState::default())),
            ids: Arc::new(IdMode::Sequential(AtomicU64::new(0))),
        }
    }

    /// Replaces the contents of an endpoint's table (first entity = newest).
    pub async fn seed(&self, endpoint: &str, entities: Vec<Entity>) {
        self.state
            .write()
            .await
            .tables
            .insert(endpoint.to_string(), entities);
    }

    /// Current contents of an endpoint's table.
    pub async fn entities(&self, endpoint: &str) -> Vec<Entity> {
        self.state
            .read()
            .await
            .tables
            .get(endpoint)
            .cloned()
            .unwrap_or_default()
    }

    /// Queues an override for the next write.
    pub async fn script_next_write(&self, scripted: ScriptedWrite) {
        self.state.write().await.scripted.push_back(scripted);
    }

    /// Calls received so far, in order.
    pub async fn calls(&self) -> Vec<(CallKind, String)> {
        self.state.read().await.calls.clone()
    }

    fn next_id(&self) -> EntityId {
        match self.ids.as_ref() {
            IdMode::Uuid => EntityId::new(Uuid::now_v7().to_string()),
            IdMode::Sequential(counter) => {
                EntityId::new((counter.fetch_add(1, Ordering::Relaxed) + 1).to_string())
            }
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn now_value() -> Value {
    Value::String(Utc::now().to_rfc3339())
}

fn entity_value(entity: &Entity) -> Result<Value, TransportError> {
    serde_json::to_value(entity).map_err(|error| TransportError::Decode(error.to_string()))
}

fn not_found(endpoint: &str, id: &EntityId) -> TransportError {
    TransportError::NotFound(format!("{endpoint} {id}"))
}

/// Compares a filter value with a field, treating non-string fields by their
/// JSON rendering.
fn field_matches(entity: &Entity, name: &str, expected: &str) -> bool {
    match entity.field(name) {
        Some(Value::String(actual)) => actual == expected,
        Some(other) => other.to_string() == expected,
        None => false,
    }
}

/// Takes the next scripted override and records the call.
async fn begin_write(
    state: &RwLock<BackendState>,
    kind: CallKind,
    endpoint: &str,
) -> Option<ScriptedWrite> {
    let mut guard = state.write().await;
    guard.calls.push((kind, endpoint.to_string()));
    guard.scripted.pop_front()
}

impl Transport for InMemoryTransport {
    fn create(&self, endpoint: &str, payload: &Map<String, Value>) -> TransportFuture {
        let state = Arc::clone(&self.state);
        let endpoint = endpoint.to_string();
        let mut fields = payload.clone();
        let id = self.next_id();

        async move {
            match begin_write(&state, CallKind::Create, &endpoint).await {
                Some(ScriptedWrite::Fail(error)) => return Err(error),
                Some(ScriptedWrite::Respond(body)) => return Ok(body),
                None => {}
            }

            let now = now_value();
            fields.insert("createdAt".to_string(), now.clone());
            fields.insert("updatedAt".to_string(), now);
            let entity = Entity::new(id, fields);

            let mut guard = state.write().await;
            guard
                .tables
                .entry(endpoint)
                .or_default()
                .insert(0, entity.clone());
            drop(guard);

            entity_value(&entity)
        }
        .boxed()
    }

    fn update(
        &self,
        endpoint: &str,
        id: &EntityId,
        payload: &Map<String, Value>,
    ) -> TransportFuture {
        let state = Arc::clone(&self.state);
        let endpoint = endpoint.to_string();
        let id = id.clone();
        let mut patch = payload.clone();

        async move {
            match begin_write(&state, CallKind::Update, &endpoint).await {
                Some(ScriptedWrite::Fail(error)) => return Err(error),
                Some(ScriptedWrite::Respond(body)) => return Ok(body),
                None => {}
            }

            patch.insert("updatedAt".to_string(), now_value());

            let mut guard = state.write().await;
            let slot = guard
                .tables
                .get_mut(&endpoint)
                .and_then(|table| table.iter_mut().find(|entity| entity.id == id))
                .ok_or_else(|| not_found(&endpoint, &id))?;
            *slot = slot.merged(&patch);
            let updated = slot.clone();
            drop(guard);

            entity_value(&updated)
        }
        .boxed()
    }

    fn delete(&self, endpoint: &str, id: &EntityId) -> TransportFuture {
        let state = Arc::clone(&self.state);
        let endpoint = endpoint.to_string();
        let id = id.clone();

        async move {
            match begin_write(&state, CallKind::Delete, &endpoint).await {
                Some(ScriptedWrite::Fail(error)) => return Err(error),
                Some(ScriptedWrite::Respond(body)) => return Ok(body),
                None => {}
            }

            let mut guard = state.write().await;
            let table = guard
                .tables
                .get_mut(&endpoint)
                .ok_or_else(|| not_found(&endpoint, &id))?;
            let position = table
                .iter()
                .position(|entity| entity.id == id)
                .ok_or_else(|| not_found(&endpoint, &id))?;
            let removed = table.remove(position);
            drop(guard);

            entity_value(&removed)
        }
        .boxed()
    }

    fn find_many(&self, endpoint: &str, query: &ListQuery) -> TransportFuture {
        let state = Arc::clone(&self.state);
        let endpoint = endpoint.to_string();
        let query = query.clone();

        async move {
            let mut guard = state.write().await;
            guard.calls.push((CallKind::FindMany, endpoint.clone()));
            let filtered: Vec<Entity> = guard
                .tables
                .get(&endpoint)
                .map(|table| {
                    table
                        .iter()
                        .filter(|entity| {
                            query
                                .filters
                                .iter()
                                .all(|(name, value)| field_matches(entity, name, value))
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            drop(guard);

            let page = query.page.max(1);
            let limit = query.limit.max(1);
            let total = filtered.len() as u64;
            #[allow(clippy::cast_possible_truncation)]
            let offset = ((page - 1) * limit) as usize;
            #[allow(clippy::cast_possible_truncation)]
            let data: Vec<Entity> = filtered
                .into_iter()
                .skip(offset)
                .take(limit as usize)
                .collect();

            let view = FlatView::new(data, PageMeta::new(page, limit, total));
            serde_json::to_value(&view).map_err(|error| TransportError::Decode(error.to_string()))
        }
        .boxed()
    }

    fn find_by_id(&self, endpoint: &str, id: &EntityId) -> TransportFuture {
        let state = Arc::clone(&self.state);
        let endpoint = endpoint.to_string();
        let id = id.clone();

        async move {
            let mut guard = state.write().await;
            guard.calls.push((CallKind::FindById, endpoint.clone()));
            let found = guard
                .tables
                .get(&endpoint)
                .and_then(|table| table.iter().find(|entity| entity.id == id))
                .cloned();
            drop(guard);

            found.map_or_else(|| Err(not_found(&endpoint, &id)), |entity| entity_value(&entity))
        }
        .boxed()
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

// =============================================================================
// Tests
// =============================================================================
