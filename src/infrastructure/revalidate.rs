//! Revalidation of views the cache does not own.
//!
//! After every mutation, success or failure, the synchronizer asks a
//! [`Revalidator`] to refresh whatever is rendered outside the cache. The
//! call takes no arguments; the receiving side decides what to re-render.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::TransportError;

/// Deferred revalidation call.
pub type RevalidateFuture = BoxFuture<'static, Result<(), TransportError>>;

/// Forces a refresh of externally rendered views.
pub trait Revalidator: Send + Sync {
    /// Triggers the refresh.
    fn force_revalidate(&self) -> RevalidateFuture;

    /// Returns false if calling [`Self::force_revalidate`] does nothing.
    fn is_enabled(&self) -> bool {
        true
    }
}

// =============================================================================
// No-op
// =============================================================================

/// Revalidator used when nothing outside the cache renders resource data.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRevalidator;

impl Revalidator for NoopRevalidator {
    fn force_revalidate(&self) -> RevalidateFuture {
        futures::future::ready(Ok(())).boxed()
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

// =============================================================================
// HTTP
// =============================================================================

/// Revalidator that POSTs to a revalidation endpoint.
#[derive(Debug, Clone)]
pub struct HttpRevalidator {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpRevalidator {
    /// Creates a revalidator posting to `url`.
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }
}

impl Revalidator for HttpRevalidator {
    #[allow(clippy::cast_possible_truncation)]
    fn force_revalidate(&self) -> RevalidateFuture {
        let request = self.client.post(&self.url).timeout(self.timeout);
        let timeout_ms = self.timeout.as_millis() as u64;

        async move {
            let response = request.send().await.map_err(|error| {
                if error.is_timeout() {
                    TransportError::Timeout(timeout_ms)
                } else {
                    TransportError::ConnectionFailed(error.to_string())
                }
            })?;
            let status = response.status();
            if status.is_success() {
                Ok(())
            } else {
                Err(TransportError::Status {
                    status: status.as_u16(),
                    message: status.canonical_reason().unwrap_or_default().to_string(),
                })
            }
        }
        .boxed()
    }
}

// =============================================================================
// Counting
// =============================================================================

/// Revalidator that counts calls and can be told to fail.
#[derive(Debug, Clone, Default)]
pub struct CountingRevalidator {
    calls: Arc<AtomicUsize>,
    failure: Option<TransportError>,
}

impl CountingRevalidator {
    /// Creates a revalidator that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a revalidator that always fails with `error`.
    #[must_use]
    pub fn failing(error: TransportError) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            failure: Some(error),
        }
    }

    /// Number of calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Revalidator for CountingRevalidator {
    fn force_revalidate(&self) -> RevalidateFuture {
        self.calls.fetch_add(1, Ordering::SeqCst);
        futures::future::ready(self.failure.clone().map_or(Ok(()), Err)).boxed()
    }
}
