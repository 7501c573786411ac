//! # mutation-sync
//!
//! Optimistic mutation synchronization for a client-side view cache.
//!
//! ## Overview
//!
//! A cache holds views (paginated lists, infinite-scroll segments, detail
//! entities) of remote resources. A mutation is reflected in every affected
//! view before the server answers, then either reconciled with the server's
//! response or rolled back to the snapshot taken before it was applied.
//!
//! - **Domain**: entities, views and their keys, resource descriptors,
//!   approval workflows
//! - **Infrastructure**: the cache store, transports (HTTP, in-memory and
//!   fault-injecting), revalidators
//! - **Sync**: the mutation protocol and the per-resource registry
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use mutation_sync::domain::{ListQuery, ResourceDescriptor};
//! use mutation_sync::infrastructure::{InMemoryCacheStore, InMemoryTransport};
//! use mutation_sync::sync::{SyncOptions, Synchronizer};
//! use serde_json::json;
//!
//! # let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
//! # runtime.block_on(async {
//! let synchronizer = Synchronizer::new(
//!     ResourceDescriptor::new("igps", "igp"),
//!     Arc::new(InMemoryCacheStore::new()),
//!     Arc::new(InMemoryTransport::new()),
//!     SyncOptions::default(),
//! );
//!
//! synchronizer.fetch_page(&ListQuery::default()).await.unwrap();
//! let payload = json!({"projectTitle": "Bake sale"}).as_object().cloned().unwrap();
//! let created = synchronizer.create(payload).await.unwrap();
//! assert!(!created.id.is_provisional());
//! # });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Note: Disabling redundant_closure_for_method_calls due to clippy 0.1.92 panic bug
#![allow(clippy::redundant_closure_for_method_calls)]

pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod sync;

pub use config::{ConfigError, SyncConfig};
pub use error::{FieldError, SyncError, TransportError, ValidationError};
