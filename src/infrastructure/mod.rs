//! Ports to the world outside the synchronizer and their implementations.

pub mod cache;
pub mod fail_injection;
pub mod in_memory;
pub mod revalidate;
pub mod transport;

pub use cache::{CacheStore, InMemoryCacheStore, ReadTicket};
pub use fail_injection::{FailInjectionConfig, FaultyTransport, RngProvider, ScopedRng};
pub use in_memory::{CallKind, InMemoryTransport, ScriptedWrite};
pub use revalidate::{
    CountingRevalidator, HttpRevalidator, NoopRevalidator, RevalidateFuture, Revalidator,
};
pub use transport::{DEFAULT_BASE_URL, HttpTransport, Route, Transport, TransportFuture};
