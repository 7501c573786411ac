//! Fault injection around a [`Transport`].
//!
//! [`FaultyTransport`] decorates any transport with:
//!
//! - **Delay injection**: artificial latency, which reorders overlapping mutations
//! - **Failure injection**: a probability of failing after the call
//! - **Timeout simulation**: a probability of reporting a timeout
//!
//! Injection is applied after the real call completes, so the backend still
//! sees every request. A write reported as failed may therefore have been
//! applied server-side; settlement revalidation is what brings such views
//! back in line.
//!
//! Randomness comes from an [`RngProvider`]. With a seed, every call derives
//! its own RNG from (seed, call sequence, endpoint, operation), so a serial run
//! is reproducible.

use std::hash::Hasher;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};
use siphasher::sip::SipHasher24;

use super::transport::{Transport, TransportFuture};
use crate::config::{ConfigError, parse_f64, parse_u64};
use crate::domain::{EntityId, ListQuery};
use crate::error::TransportError;

// =============================================================================
// Fail Injection Config
// =============================================================================

/// Configuration for fault injection.
#[derive(Debug, Clone)]
pub struct FailInjectionConfig {
    /// Probability of injecting a failure (0.0 - 1.0).
    pub failure_rate: f64,
    /// Minimum delay in milliseconds.
    pub delay_min_ms: u64,
    /// Maximum delay in milliseconds.
    pub delay_max_ms: u64,
    /// Probability of simulating a timeout (0.0 - 1.0).
    pub timeout_rate: f64,
    /// Timeout value reported in [`TransportError::Timeout`].
    pub timeout_ms: u64,
}

impl Default for FailInjectionConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            delay_min_ms: 0,
            delay_max_ms: 0,
            timeout_rate: 0.0,
            timeout_ms: 5000,
        }
    }
}

impl FailInjectionConfig {
    /// Reads `{prefix}_FAILURE_RATE`, `{prefix}_DELAY_MIN_MS`,
    /// `{prefix}_DELAY_MAX_MS` and `{prefix}_TIMEOUT_RATE` through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is malformed or the result fails
    /// validation. Missing variables use default values.
    pub fn from_lookup(
        prefix: &str,
        lookup: &dyn Fn(&str) -> Option<String>,
        timeout_ms: u64,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            failure_rate: parse_f64(lookup, &format!("{prefix}_FAILURE_RATE"), 0.0)?,
            delay_min_ms: parse_u64(lookup, &format!("{prefix}_DELAY_MIN_MS"), 0)?,
            delay_max_ms: parse_u64(lookup, &format!("{prefix}_DELAY_MAX_MS"), 0)?,
            timeout_rate: parse_f64(lookup, &format!("{prefix}_TIMEOUT_RATE"), 0.0)?,
            timeout_ms,
        };
        config.validate()?;
        Ok(config)
    }

    /// Creates a configuration with a fixed delay.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration fails validation.
    pub fn deterministic(
        failure_rate: f64,
        delay_ms: u64,
        timeout_rate: f64,
        timeout_ms: u64,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            failure_rate,
            delay_min_ms: delay_ms,
            delay_max_ms: delay_ms,
            timeout_rate,
            timeout_ms,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error if a rate is outside `0.0..=1.0` or
    /// `delay_min_ms > delay_max_ms`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(ConfigError::InvalidFailureRate(self.failure_rate));
        }
        if !(0.0..=1.0).contains(&self.timeout_rate) {
            return Err(ConfigError::InvalidTimeoutRate(self.timeout_rate));
        }
        if self.delay_min_ms > self.delay_max_ms {
            return Err(ConfigError::InvalidDelayRange {
                min: self.delay_min_ms,
                max: self.delay_max_ms,
            });
        }
        Ok(())
    }

    /// Returns whether any injection is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.failure_rate > 0.0 || self.delay_max_ms > 0 || self.timeout_rate > 0.0
    }
}

// =============================================================================
// RNG Provider
// =============================================================================

/// Source of per-call RNGs.
///
/// Child seeds are derived with `SipHash-2-4` under a zero key over the
/// parent seed followed by the scope parts, so the same scope always yields
/// the same sequence.
#[derive(Debug, Clone, Copy)]
pub struct RngProvider {
    parent_seed: Option<u64>,
}

impl RngProvider {
    /// Random mode: every scoped RNG is seeded from the OS.
    #[must_use]
    pub const fn new_random() -> Self {
        Self { parent_seed: None }
    }

    /// Seeded mode: scoped RNGs are derived from `seed`.
    #[must_use]
    pub const fn new_seeded(seed: u64) -> Self {
        Self {
            parent_seed: Some(seed),
        }
    }

    /// Seeded if `seed` is set, random otherwise.
    #[must_use]
    pub fn from_seed(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::new_random, |seed| {
            tracing::info!(seed, "Using deterministic RNG");
            Self::new_seeded(seed)
        })
    }

    /// Creates the RNG for one call.
    #[must_use]
    #[allow(clippy::option_if_let_else)]
    pub fn for_operation(&self, sequence: u64, endpoint: &str, operation: &str) -> ScopedRng {
        match self.parent_seed {
            Some(parent_seed) => {
                let mut hasher = SipHasher24::new_with_key(&[0u8; 16]);
                hasher.write(&parent_seed.to_le_bytes());
                hasher.write(&sequence.to_le_bytes());
                hasher.write(b":");
                hasher.write(endpoint.as_bytes());
                hasher.write(b":");
                hasher.write(operation.as_bytes());
                ScopedRng(StdRng::seed_from_u64(hasher.finish()))
            }
            None => ScopedRng(StdRng::from_os_rng()),
        }
    }
}

/// RNG owned by one call. `Send`, so it can cross await points.
pub struct ScopedRng(StdRng);

impl ScopedRng {
    /// A value in `[0.0, 1.0)`.
    pub fn random_f64(&mut self) -> f64 {
        self.0.random()
    }

    /// A value in `[min, max]`.
    pub fn random_range(&mut self, min: u64, max: u64) -> u64 {
        self.0.random_range(min..=max)
    }
}

// =============================================================================
// Post-Injection Application
// =============================================================================

/// Applies delay, then failure, then timeout injection.
///
/// # Errors
///
/// Returns [`TransportError::InjectedFailure`] or [`TransportError::Timeout`]
/// when the dice say so.
pub async fn apply_post_injection(
    config: &FailInjectionConfig,
    rng: &mut ScopedRng,
) -> Result<(), TransportError> {
    let delay_ms = compute_delay(config, rng);
    if delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    if rng.random_f64() < config.failure_rate {
        return Err(TransportError::InjectedFailure(
            "Random failure injection".to_string(),
        ));
    }

    if rng.random_f64() < config.timeout_rate {
        return Err(TransportError::Timeout(config.timeout_ms));
    }

    Ok(())
}

fn compute_delay(config: &FailInjectionConfig, rng: &mut ScopedRng) -> u64 {
    if config.delay_max_ms == 0 {
        0
    } else if config.delay_min_ms == config.delay_max_ms {
        config.delay_min_ms
    } else {
        rng.random_range(config.delay_min_ms, config.delay_max_ms)
    }
}

// =============================================================================
// Faulty Transport
// =============================================================================

/// [`Transport`] decorator that injects faults after every call.
#[derive(Debug, Clone)]
pub struct FaultyTransport<T> {
    inner: T,
    config: FailInjectionConfig,
    rng: RngProvider,
    sequence: Arc<AtomicU64>,
}

impl<T: Transport> FaultyTransport<T> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: T, config: FailInjectionConfig, rng: RngProvider) -> Self {
        Self {
            inner,
            config,
            rng,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The wrapped transport.
    #[must_use]
    pub const fn inner(&self) -> &T {
        &self.inner
    }

    fn wrap(&self, endpoint: &str, operation: &'static str, call: TransportFuture) -> TransportFuture {
        if !self.config.is_enabled() {
            return call;
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut rng = self.rng.for_operation(sequence, endpoint, operation);
        let config = self.config.clone();
        let endpoint = endpoint.to_string();

        async move {
            let value = call.await?;
            if let Err(error) = apply_post_injection(&config, &mut rng).await {
                tracing::debug!(%endpoint, operation, %error, "Injected transport fault");
                return Err(error);
            }
            Ok(value)
        }
        .boxed()
    }
}

impl<T: Transport> Transport for FaultyTransport<T> {
    fn create(&self, endpoint: &str, payload: &Map<String, Value>) -> TransportFuture {
        self.wrap(endpoint, "create", self.inner.create(endpoint, payload))
    }

    fn update(
        &self,
        endpoint: &str,
        id: &EntityId,
        payload: &Map<String, Value>,
    ) -> TransportFuture {
        self.wrap(endpoint, "update", self.inner.update(endpoint, id, payload))
    }

    fn delete(&self, endpoint: &str, id: &EntityId) -> TransportFuture {
        self.wrap(endpoint, "delete", self.inner.delete(endpoint, id))
    }

    fn find_many(&self, endpoint: &str, query: &ListQuery) -> TransportFuture {
        self.wrap(endpoint, "find_many", self.inner.find_many(endpoint, query))
    }

    fn find_by_id(&self, endpoint: &str, id: &EntityId) -> TransportFuture {
        self.wrap(endpoint, "find_by_id", self.inner.find_by_id(endpoint, id))
    }

    fn name(&self) -> &'static str {
        "faulty"
    }
}

// =============================================================================
// Tests
// =============================================================================
