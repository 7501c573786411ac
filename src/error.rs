//! Error types for the synchronizer.
//!
//! Every failure a mutation can produce is folded into [`SyncError`] before it
//! reaches the caller. Transport-level failures keep their own enum so that
//! transports can be implemented and tested without knowing about cache state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Transport Error
// =============================================================================

/// Errors raised by a [`Transport`](crate::infrastructure::Transport).
///
/// Covers both real I/O failures and injected failures used in tests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Failed to establish a connection to the backend.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Request timed out after the given number of milliseconds.
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// Backend answered with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },

    /// Backend reports that the target entity does not exist.
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Failure injected for testing purposes.
    #[error("Injected failure: {0}")]
    InjectedFailure(String),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Field-level error for a rejected payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Name of the offending field.
    pub field: String,
    /// Human-readable reason.
    pub message: String,
}

impl FieldError {
    /// Creates a new field error.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// A mutation request that was refused before dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Validation failed: {}", summarize(.errors))]
pub struct ValidationError {
    /// Field-level errors.
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    /// Creates a validation error from a list of field errors.
    #[must_use]
    pub const fn new(errors: Vec<FieldError>) -> Self {
        Self { errors }
    }

    /// Creates a validation error with a single field error.
    #[must_use]
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(vec![FieldError::new(field, message)])
    }

    /// Returns true if there are no field errors.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|error| format!("{}: {}", error.field, error.message))
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Sync Error
// =============================================================================

/// The single tagged error surfaced by a synchronizer.
///
/// Any error produced after the optimistic write has been applied has already
/// gone through rollback by the time the caller sees it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Payload rejected before dispatch; the cache was not touched.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Network or HTTP failure during dispatch.
    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// Backend reports the target entity missing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend answered with an entity the cache cannot be keyed by.
    #[error("Reconciliation conflict on {resource}: {detail}")]
    ReconciliationConflict {
        /// Resource name of the mutation.
        resource: String,
        /// What was wrong with the response.
        detail: String,
    },

    /// A workflow status change that the transition table forbids.
    #[error("Invalid transition for {workflow}: {from} -> {to}")]
    InvalidTransition {
        /// Workflow name.
        workflow: &'static str,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },
}

impl From<TransportError> for SyncError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::NotFound(message) => Self::NotFound(message),
            other => Self::Transport(other),
        }
    }
}

impl SyncError {
    /// Returns true if the error was raised before any cache write happened.
    #[must_use]
    pub const fn is_refusal(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InvalidTransition { .. })
    }
}

// =============================================================================
// Tests
// =============================================================================
