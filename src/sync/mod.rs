//! Optimistic mutation protocol.
//!
//! [`Synchronizer`] drives one mutation through snapshot capture, the
//! optimistic projection, a single dispatch, and then reconciliation or
//! rollback followed by settlement. [`SyncRegistry`] builds one synchronizer
//! per resource over a shared cache.

mod dispatcher;
mod mutation;
mod projector;
mod reconciler;
mod registry;
mod rollback;
mod settlement;
mod snapshot;
mod synchronizer;

pub use dispatcher::MutationDispatcher;
pub use mutation::{
    MutationContext, MutationId, MutationOutcome, MutationPhase, MutationRequest, Operation,
};
pub use projector::{Change, OptimisticProjector, Projection};
pub use reconciler::Reconciler;
pub use registry::SyncRegistry;
pub use rollback::{RollbackHandler, RollbackPolicy, RollbackReport};
pub use settlement::SettlementTrigger;
pub use snapshot::{Snapshot, SnapshotManager, SnapshotSet, ViewSelection};
pub use synchronizer::{SyncOptions, Synchronizer};
