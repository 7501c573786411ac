//! Mutation model: requests, lifecycle phases and outcomes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::{Entity, EntityId, ResourceDescriptor, ViewKey};
use crate::error::{FieldError, SyncError, ValidationError};

// =============================================================================
// Mutation Id
// =============================================================================

/// Identifier of one mutation, used to tag snapshots and log spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MutationId(Uuid);

impl MutationId {
    /// Generates a new id (UUID v7, so ids sort by start time).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for MutationId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

// =============================================================================
// Operation and Request
// =============================================================================

/// Kind of write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Create a new entity.
    Create,
    /// Update an existing entity.
    Update,
    /// Delete an existing entity.
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(formatter, "create"),
            Self::Update => write!(formatter, "update"),
            Self::Delete => write!(formatter, "delete"),
        }
    }
}

/// One logical write against a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    operation: Operation,
    target: Option<EntityId>,
    payload: Map<String, Value>,
}

impl MutationRequest {
    /// A create with `payload`.
    #[must_use]
    pub fn create(payload: Map<String, Value>) -> Self {
        Self {
            operation: Operation::Create,
            target: None,
            payload,
        }
    }

    /// An update of `id` with `payload`.
    #[must_use]
    pub fn update(id: EntityId, payload: Map<String, Value>) -> Self {
        Self {
            operation: Operation::Update,
            target: Some(id),
            payload,
        }
    }

    /// A delete of `id`.
    #[must_use]
    pub fn delete(id: EntityId) -> Self {
        Self {
            operation: Operation::Delete,
            target: Some(id),
            payload: Map::new(),
        }
    }

    /// Kind of write.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.operation
    }

    /// Existing entity targeted by an update or delete.
    #[must_use]
    pub const fn target(&self) -> Option<&EntityId> {
        self.target.as_ref()
    }

    /// Fields sent to the server.
    #[must_use]
    pub const fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Checks the request against the resource before anything is touched.
    ///
    /// - create: every required field is present, non-null and not blank
    /// - update: a confirmed target id and a non-empty payload
    /// - delete: a confirmed target id
    ///
    /// # Errors
    ///
    /// Returns every field problem found, not just the first.
    pub fn validate(&self, descriptor: &ResourceDescriptor) -> Result<(), ValidationError> {
        let mut errors = Vec::new();

        match self.operation {
            Operation::Create => {
                for field in descriptor.required_fields() {
                    if is_blank(self.payload.get(field)) {
                        errors.push(FieldError::new(field.as_str(), "is required"));
                    }
                }
            }
            Operation::Update | Operation::Delete => {
                check_target(self.target.as_ref(), &mut errors);
                if self.operation == Operation::Update && self.payload.is_empty() {
                    errors.push(FieldError::new("payload", "must contain at least one field"));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(errors))
        }
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.trim().is_empty(),
        Some(_) => false,
    }
}

fn check_target(target: Option<&EntityId>, errors: &mut Vec<FieldError>) {
    match target {
        None => errors.push(FieldError::new("id", "is required")),
        Some(id) if id.as_str().is_empty() => errors.push(FieldError::new("id", "is required")),
        Some(id) if id.is_provisional() => errors.push(FieldError::new(
            "id",
            "refers to an entity the server has not confirmed yet",
        )),
        Some(_) => {}
    }
}

// =============================================================================
// Phase
// =============================================================================

/// Lifecycle phase of one mutation.
///
/// ```text
/// idle -> pending -> optimistic-applied -> succeeded -> reconciled -> settled
///                                       -> failed    -> rolled-back -> settled
/// idle -> settled   (refused before dispatch)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationPhase {
    /// Not started.
    Idle,
    /// Accepted; snapshots are being taken.
    Pending,
    /// Optimistic state written; the request is in flight.
    OptimisticApplied,
    /// Server accepted the write.
    Succeeded,
    /// Provisional state replaced by server data.
    Reconciled,
    /// Server or transport rejected the write.
    Failed,
    /// Snapshots written back.
    RolledBack,
    /// Terminal.
    Settled,
}

impl MutationPhase {
    /// Phases reachable in one step.
    #[must_use]
    pub const fn successors(self) -> &'static [Self] {
        match self {
            Self::Idle => &[Self::Pending, Self::Settled],
            Self::Pending => &[Self::OptimisticApplied],
            Self::OptimisticApplied => &[Self::Succeeded, Self::Failed],
            Self::Succeeded => &[Self::Reconciled],
            Self::Failed => &[Self::RolledBack],
            Self::Reconciled | Self::RolledBack => &[Self::Settled],
            Self::Settled => &[],
        }
    }

    /// Returns true if `next` is reachable in one step.
    #[must_use]
    pub fn can_advance_to(self, next: Self) -> bool {
        self.successors().contains(&next)
    }
}

impl std::fmt::Display for MutationPhase {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Pending => "pending",
            Self::OptimisticApplied => "optimistic-applied",
            Self::Succeeded => "succeeded",
            Self::Reconciled => "reconciled",
            Self::Failed => "failed",
            Self::RolledBack => "rolled-back",
            Self::Settled => "settled",
        };
        write!(formatter, "{name}")
    }
}

// =============================================================================
// Context
// =============================================================================

/// State carried through one mutation's lifecycle.
#[derive(Debug, Clone)]
pub struct MutationContext {
    id: MutationId,
    resource: String,
    request: MutationRequest,
    provisional: Option<Entity>,
    phases: Vec<MutationPhase>,
}

impl MutationContext {
    /// Starts a context in [`MutationPhase::Idle`].
    #[must_use]
    pub fn new(resource: impl Into<String>, request: MutationRequest) -> Self {
        Self {
            id: MutationId::generate(),
            resource: resource.into(),
            request,
            provisional: None,
            phases: vec![MutationPhase::Idle],
        }
    }

    /// Mutation id.
    #[must_use]
    pub const fn id(&self) -> MutationId {
        self.id
    }

    /// Resource name.
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The request being carried out.
    #[must_use]
    pub const fn request(&self) -> &MutationRequest {
        &self.request
    }

    /// Provisional entity synthesized for a create.
    #[must_use]
    pub const fn provisional(&self) -> Option<&Entity> {
        self.provisional.as_ref()
    }

    /// Attaches the provisional entity.
    pub fn set_provisional(&mut self, entity: Entity) {
        self.provisional = Some(entity);
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> MutationPhase {
        self.phases.last().copied().unwrap_or(MutationPhase::Idle)
    }

    /// Every phase entered so far, in order.
    #[must_use]
    pub fn phases(&self) -> &[MutationPhase] {
        &self.phases
    }

    /// Moves to `next`. Returns false, and stays put, if the transition is
    /// not in the table.
    pub fn advance(&mut self, next: MutationPhase) -> bool {
        let current = self.phase();
        if !current.can_advance_to(next) {
            tracing::error!(mutation_id = %self.id, %current, %next, "Illegal mutation phase transition");
            return false;
        }
        tracing::debug!(mutation_id = %self.id, phase = %next, "Mutation phase");
        self.phases.push(next);
        true
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Everything a finished mutation did.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    /// Mutation id.
    pub mutation_id: MutationId,
    /// Resource name.
    pub resource: String,
    /// Kind of write.
    pub operation: Operation,
    /// Provisional id used for a create.
    pub provisional_id: Option<EntityId>,
    /// Every phase entered, ending in [`MutationPhase::Settled`].
    pub phases: Vec<MutationPhase>,
    /// Keys written by the optimistic step.
    pub optimistic_keys: Vec<ViewKey>,
    /// Keys written by reconciliation.
    pub reconciled_keys: Vec<ViewKey>,
    /// Keys written back by rollback.
    pub restored_keys: Vec<ViewKey>,
    /// Keys rollback left alone because another write got there first.
    pub skipped_keys: Vec<ViewKey>,
    /// Server entity on success (absent for a delete with an empty body).
    pub result: Result<Option<Entity>, SyncError>,
}

impl MutationOutcome {
    /// Returns true if the server accepted the write.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Final phase.
    #[must_use]
    pub fn final_phase(&self) -> MutationPhase {
        self.phases.last().copied().unwrap_or(MutationPhase::Idle)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn lockers() -> ResourceDescriptor {
        ResourceDescriptor::new("lockers", "locker").with_required_fields(["lockerNumber", "location"])
    }

    #[rstest]
    fn test_create_reports_every_missing_field() {
        let request = MutationRequest::create(payload(json!({"location": "  "})));
        let error = request.validate(&lockers()).unwrap_err();
        let fields: Vec<&str> = error.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["lockerNumber", "location"]);
    }

    #[rstest]
    fn test_create_with_required_fields_is_valid() {
        let request = MutationRequest::create(payload(json!({"lockerNumber": 0, "location": "B"})));
        assert!(request.validate(&lockers()).is_ok());
    }

    #[rstest]
    #[case(MutationRequest::update(EntityId::new(""), payload(json!({"a": 1}))))]
    #[case(MutationRequest::update(EntityId::new("temp-3"), payload(json!({"a": 1}))))]
    #[case(MutationRequest::update(EntityId::new("l1"), Map::new()))]
    #[case(MutationRequest::delete(EntityId::new("temp-3")))]
    fn test_invalid_targeted_requests(#[case] request: MutationRequest) {
        assert!(request.validate(&lockers()).is_err());
    }

    #[rstest]
    fn test_delete_needs_no_payload() {
        assert!(MutationRequest::delete(EntityId::new("l1")).validate(&lockers()).is_ok());
    }

    #[rstest]
    #[case(MutationPhase::Idle, MutationPhase::Pending, true)]
    #[case(MutationPhase::Idle, MutationPhase::Settled, true)]
    #[case(MutationPhase::Pending, MutationPhase::Succeeded, false)]
    #[case(MutationPhase::Pending, MutationPhase::OptimisticApplied, true)]
    #[case(MutationPhase::OptimisticApplied, MutationPhase::Failed, true)]
    #[case(MutationPhase::Succeeded, MutationPhase::Settled, false)]
    #[case(MutationPhase::Failed, MutationPhase::RolledBack, true)]
    #[case(MutationPhase::RolledBack, MutationPhase::Settled, true)]
    #[case(MutationPhase::Settled, MutationPhase::Pending, false)]
    #[case(MutationPhase::Reconciled, MutationPhase::Pending, false)]
    fn test_phase_table(
        #[case] from: MutationPhase,
        #[case] to: MutationPhase,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_advance_to(to), allowed);
    }

    #[rstest]
    fn test_context_rejects_illegal_advance() {
        let mut context = MutationContext::new("lockers", MutationRequest::delete(EntityId::new("l1")));
        assert!(context.advance(MutationPhase::Pending));
        assert!(!context.advance(MutationPhase::Succeeded));
        assert_eq!(context.phase(), MutationPhase::Pending);
        assert_eq!(context.phases(), &[MutationPhase::Idle, MutationPhase::Pending]);
    }

    #[rstest]
    fn test_phase_display_matches_serde() {
        for phase in [MutationPhase::OptimisticApplied, MutationPhase::RolledBack] {
            assert_eq!(
                serde_json::to_value(phase).unwrap(),
                Value::String(phase.to_string())
            );
        }
    }
}
