//! Mutation Dispatcher.
//!
//! One dispatch is exactly one transport call. The dispatcher never retries
//! and never touches the cache; it only turns the response into an entity or
//! a tagged error.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::{Entity, ResourceDescriptor};
use crate::error::{SyncError, ValidationError};
use crate::infrastructure::Transport;

use super::mutation::{MutationRequest, Operation};

/// Sends mutations for one resource.
#[derive(Clone)]
pub struct MutationDispatcher {
    transport: Arc<dyn Transport>,
    resource: String,
    endpoint: String,
}

impl MutationDispatcher {
    /// Creates a dispatcher for `descriptor`'s endpoint.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, descriptor: &ResourceDescriptor) -> Self {
        Self {
            transport,
            resource: descriptor.name().to_string(),
            endpoint: descriptor.endpoint().to_string(),
        }
    }

    /// Sends `request`.
    ///
    /// Returns the server entity. A delete may legitimately answer with no
    /// entity, so its result is `None` in that case.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Validation`] if an update or delete carries no target
    /// - [`SyncError::NotFound`] / [`SyncError::Transport`] on transport failure
    /// - [`SyncError::ReconciliationConflict`] if a create or update response
    ///   has no usable `id`
    pub async fn dispatch(&self, request: &MutationRequest) -> Result<Option<Entity>, SyncError> {
        let call = match (request.operation(), request.target()) {
            (Operation::Create, _) => self.transport.create(&self.endpoint, request.payload()),
            (Operation::Update, Some(id)) => {
                self.transport.update(&self.endpoint, id, request.payload())
            }
            (Operation::Delete, Some(id)) => self.transport.delete(&self.endpoint, id),
            (Operation::Update | Operation::Delete, None) => {
                return Err(ValidationError::single("id", "is required").into());
            }
        };

        let body = call.await?;

        match request.operation() {
            Operation::Create | Operation::Update => {
                Entity::from_value(body).map(Some).ok_or_else(|| {
                    SyncError::ReconciliationConflict {
                        resource: self.resource.clone(),
                        detail: format!("{} response carries no id", request.operation()),
                    }
                })
            }
            Operation::Delete => Ok(match body {
                Value::Null => None,
                other => Entity::from_value(other),
            }),
        }
    }
}

impl std::fmt::Debug for MutationDispatcher {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("MutationDispatcher")
            .field("transport", &self.transport.name())
            .field("resource", &self.resource)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityId;
    use crate::error::TransportError;
    use crate::infrastructure::{CallKind, InMemoryTransport, ScriptedWrite};
    use rstest::{fixture, rstest};
    use serde_json::{Map, json};

    #[fixture]
    fn backend() -> InMemoryTransport {
        InMemoryTransport::with_sequential_ids()
    }

    fn dispatcher(backend: &InMemoryTransport) -> MutationDispatcher {
        MutationDispatcher::new(
            Arc::new(backend.clone()),
            &ResourceDescriptor::new("igps", "igp"),
        )
    }

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[rstest]
    #[tokio::test]
    async fn test_create_makes_exactly_one_call(backend: InMemoryTransport) {
        let entity = dispatcher(&backend)
            .dispatch(&MutationRequest::create(payload(json!({"projectTitle": "Bake sale"}))))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(entity.id.as_str(), "1");
        assert_eq!(backend.calls().await, vec![(CallKind::Create, "igp".to_string())]);
    }

    #[rstest]
    #[tokio::test]
    async fn test_response_without_id_is_a_conflict(backend: InMemoryTransport) {
        backend
            .script_next_write(ScriptedWrite::Respond(json!({"projectTitle": "x"})))
            .await;
        let result = dispatcher(&backend)
            .dispatch(&MutationRequest::create(payload(json!({"projectTitle": "x"}))))
            .await;
        assert!(matches!(result, Err(SyncError::ReconciliationConflict { .. })));
    }

    #[rstest]
    #[tokio::test]
    async fn test_missing_target_maps_to_not_found(backend: InMemoryTransport) {
        let result = dispatcher(&backend)
            .dispatch(&MutationRequest::delete(EntityId::new("404")))
            .await;
        assert!(matches!(result, Err(SyncError::NotFound(_))));
    }

    #[rstest]
    #[tokio::test]
    async fn test_transport_failure_is_tagged(backend: InMemoryTransport) {
        backend
            .script_next_write(ScriptedWrite::Fail(TransportError::Status {
                status: 500,
                message: "boom".to_string(),
            }))
            .await;
        let result = dispatcher(&backend)
            .dispatch(&MutationRequest::create(Map::new()))
            .await;
        assert!(matches!(result, Err(SyncError::Transport(TransportError::Status { status: 500, .. }))));
    }

    #[rstest]
    #[tokio::test]
    async fn test_delete_accepts_empty_body(backend: InMemoryTransport) {
        backend.script_next_write(ScriptedWrite::Respond(Value::Null)).await;
        let result = dispatcher(&backend)
            .dispatch(&MutationRequest::delete(EntityId::new("1")))
            .await;
        assert_eq!(result, Ok(None));
    }
}
