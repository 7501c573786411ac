//! Settlement Trigger.

use std::sync::Arc;

use crate::infrastructure::{NoopRevalidator, Revalidator};

/// Runs after every mutation, whatever its outcome.
#[derive(Clone)]
pub struct SettlementTrigger {
    revalidator: Arc<dyn Revalidator>,
}

impl SettlementTrigger {
    /// Creates a trigger calling `revalidator`.
    #[must_use]
    pub fn new(revalidator: Arc<dyn Revalidator>) -> Self {
        Self { revalidator }
    }

    /// Forces revalidation. Failures are logged and swallowed: the mutation
    /// outcome is already decided.
    pub async fn settle(&self) {
        if !self.revalidator.is_enabled() {
            return;
        }
        if let Err(error) = self.revalidator.force_revalidate().await {
            tracing::warn!(%error, "Revalidation after mutation failed");
        }
    }
}

impl Default for SettlementTrigger {
    fn default() -> Self {
        Self::new(Arc::new(NoopRevalidator))
    }
}

impl std::fmt::Debug for SettlementTrigger {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SettlementTrigger")
            .field("enabled", &self.revalidator.is_enabled())
            .finish()
    }
}
