//! Configuration read from the environment.
//!
//! Every value is read through a lookup function. [`SyncConfig::from_env`]
//! passes `std::env::var`; tests pass a closure over a map.
//!
//! # Environment Variables
//!
//! | Variable | Default |
//! |---|---|
//! | `SYNC_API_BASE_URL` | `http://127.0.0.1:3000` |
//! | `SYNC_TIMEOUT_MS` | `5000` (minimum 1) |
//! | `SYNC_PROVISIONAL_IDS` | `unique` (`timestamp` \| `unique`) |
//! | `SYNC_ROLLBACK_POLICY` | `overwrite` (`overwrite` \| `version-guarded`) |
//! | `SYNC_REVALIDATE_URL` | unset (settlement is a no-op) |
//! | `SYNC_FAULT_FAILURE_RATE` | `0.0` |
//! | `SYNC_FAULT_DELAY_MIN_MS` | `0` |
//! | `SYNC_FAULT_DELAY_MAX_MS` | `0` |
//! | `SYNC_FAULT_TIMEOUT_RATE` | `0.0` |
//! | `RNG_SEED` | unset (random) |

use std::time::Duration;

use thiserror::Error;

use crate::domain::ProvisionalIdStrategy;
use crate::infrastructure::fail_injection::FailInjectionConfig;
use crate::infrastructure::transport::DEFAULT_BASE_URL;
use crate::sync::RollbackPolicy;

/// Prefix of the fault injection variables.
pub const FAULT_ENV_PREFIX: &str = "SYNC_FAULT";

const DEFAULT_TIMEOUT_MS: u64 = 5000;

// =============================================================================
// Environment Variable Parsing
// =============================================================================

/// Error type for environment variable parsing.
#[derive(Debug, Error)]
pub enum EnvParseError {
    /// Invalid f64 value.
    #[error("Invalid f64 value for {name}: {message} (got '{value}')")]
    InvalidF64 {
        /// Variable name.
        name: String,
        /// Error message.
        message: String,
        /// Actual value.
        value: String,
    },

    /// Invalid u64 value.
    #[error("Invalid u64 value for {name}: {message} (got '{value}')")]
    InvalidU64 {
        /// Variable name.
        name: String,
        /// Error message.
        message: String,
        /// Actual value.
        value: String,
    },

    /// Value outside the accepted set.
    #[error("Invalid value for {name}: {message}")]
    InvalidChoice {
        /// Variable name.
        name: String,
        /// Error message.
        message: String,
    },
}

/// Parses an f64, returning `default` when the variable is unset.
pub(crate) fn parse_f64(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &str,
    default: f64,
) -> Result<f64, EnvParseError> {
    lookup(name).map_or(Ok(default), |value| {
        value
            .trim()
            .parse()
            .map_err(|e: std::num::ParseFloatError| EnvParseError::InvalidF64 {
                name: name.to_string(),
                message: e.to_string(),
                value,
            })
    })
}

/// Parses a u64, returning `default` when the variable is unset.
pub(crate) fn parse_u64(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
) -> Result<u64, EnvParseError> {
    lookup(name).map_or(Ok(default), |value| {
        value
            .trim()
            .parse()
            .map_err(|e: std::num::ParseIntError| EnvParseError::InvalidU64 {
                name: name.to_string(),
                message: e.to_string(),
                value,
            })
    })
}

fn parse_choice<T>(
    lookup: &dyn Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, EnvParseError>
where
    T: std::str::FromStr<Err = String>,
{
    lookup(name)
        .map(|value| {
            value.parse().map_err(|message| EnvParseError::InvalidChoice {
                name: name.to_string(),
                message,
            })
        })
        .transpose()
}

/// Reads a variable, treating empty strings as unset.
fn non_empty(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid RNG seed value.
    #[error("Invalid RNG_SEED: {message} (got '{value}')")]
    InvalidRngSeed {
        /// Error message.
        message: String,
        /// Actual value.
        value: String,
    },

    /// Environment parsing error.
    #[error("Environment parsing error: {0}")]
    EnvParseError(#[from] EnvParseError),

    /// Failure rate out of range.
    #[error("Invalid failure rate: must be 0.0-1.0, got {0}")]
    InvalidFailureRate(f64),

    /// Timeout rate out of range.
    #[error("Invalid timeout rate: must be 0.0-1.0, got {0}")]
    InvalidTimeoutRate(f64),

    /// Invalid delay range.
    #[error("Invalid delay range: min ({min}) > max ({max})")]
    InvalidDelayRange {
        /// Minimum delay.
        min: u64,
        /// Maximum delay.
        max: u64,
    },

    /// Transport timeout of zero.
    #[error("Invalid SYNC_TIMEOUT_MS: must be at least 1")]
    ZeroTimeout,
}

// =============================================================================
// Sync Config
// =============================================================================

/// Runtime configuration of the synchronizer stack.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the resource API.
    pub api_base_url: String,
    /// Per-request transport timeout.
    pub timeout: Duration,
    /// How provisional ids are minted.
    pub provisional_ids: ProvisionalIdStrategy,
    /// How failed mutations restore their snapshots.
    pub rollback_policy: RollbackPolicy,
    /// Endpoint hit on settlement, if any.
    pub revalidate_url: Option<String>,
    /// Fault injection applied around the transport.
    pub faults: FailInjectionConfig,
    /// Seed for fault injection; `None` means random.
    pub rng_seed: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            provisional_ids: ProvisionalIdStrategy::default(),
            rollback_policy: RollbackPolicy::default(),
            revalidate_url: None,
            faults: FailInjectionConfig::default(),
            rng_seed: None,
        }
    }
}

impl SyncConfig {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is set to an invalid value.
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let timeout_ms = parse_u64(lookup, "SYNC_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?;
        if timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        let rng_seed = match lookup("RNG_SEED") {
            Some(value) => Some(value.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidRngSeed {
                    message: e.to_string(),
                    value,
                }
            })?),
            None => None,
        };

        Ok(Self {
            api_base_url: non_empty(lookup, "SYNC_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: Duration::from_millis(timeout_ms),
            provisional_ids: parse_choice(lookup, "SYNC_PROVISIONAL_IDS")?.unwrap_or_default(),
            rollback_policy: parse_choice(lookup, "SYNC_ROLLBACK_POLICY")?.unwrap_or_default(),
            revalidate_url: non_empty(lookup, "SYNC_REVALIDATE_URL"),
            faults: FailInjectionConfig::from_lookup(FAULT_ENV_PREFIX, lookup, timeout_ms)?,
            rng_seed,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
