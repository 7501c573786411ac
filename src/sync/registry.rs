//! One synchronizer per catalogued resource over a shared cache and transport.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::ResourceCatalog;
use crate::infrastructure::{CacheStore, Transport};

use super::synchronizer::{SyncOptions, Synchronizer};

/// Synchronizers keyed by resource name.
#[derive(Clone)]
pub struct SyncRegistry {
    synchronizers: BTreeMap<String, Synchronizer>,
    cache: Arc<dyn CacheStore>,
}

impl SyncRegistry {
    /// Builds a synchronizer for every resource in `catalog`.
    #[must_use]
    pub fn new(
        catalog: &ResourceCatalog,
        cache: Arc<dyn CacheStore>,
        transport: Arc<dyn Transport>,
        options: &SyncOptions,
    ) -> Self {
        let synchronizers = catalog
            .iter()
            .map(|descriptor| {
                let synchronizer = Synchronizer::new(
                    descriptor.clone(),
                    Arc::clone(&cache),
                    Arc::clone(&transport),
                    options.clone(),
                );
                (descriptor.name().to_string(), synchronizer)
            })
            .collect();

        tracing::debug!(transport = transport.name(), "Built sync registry");
        Self {
            synchronizers,
            cache,
        }
    }

    /// Synchronizer for `resource`.
    #[must_use]
    pub fn get(&self, resource: &str) -> Option<&Synchronizer> {
        self.synchronizers.get(resource)
    }

    /// Iterates in resource-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Synchronizer)> {
        self.synchronizers
            .iter()
            .map(|(name, synchronizer)| (name.as_str(), synchronizer))
    }

    /// Resource names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.synchronizers.keys().map(String::as_str).collect()
    }

    /// The shared cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }
}

impl std::fmt::Debug for SyncRegistry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncRegistry")
            .field("resources", &self.names())
            .finish_non_exhaustive()
    }
}
