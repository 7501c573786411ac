//! Entity model.
//!
//! Entities are opaque JSON records with a stable string `id`. The synchronizer
//! never interprets any other field; it only merges them.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Prefix that marks an id as provisional (not yet confirmed by the server).
pub const PROVISIONAL_PREFIX: &str = "temp-";

// =============================================================================
// Entity Id
// =============================================================================

/// Identifier of an entity.
///
/// Real ids are assigned by the server. Provisional ids start with
/// [`PROVISIONAL_PREFIX`] and only ever live in the client cache.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Some endpoints serialize autoincrement keys as numbers.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(serde_json::Number),
        }

        match RawId::deserialize(deserializer)? {
            RawId::Text(id) => Ok(Self(id)),
            RawId::Number(number) => Ok(Self(number.to_string())),
        }
    }
}

impl EntityId {
    /// Creates an id from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this is a provisional placeholder id.
    #[must_use]
    pub fn is_provisional(&self) -> bool {
        self.0.starts_with(PROVISIONAL_PREFIX)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// =============================================================================
// Entity
// =============================================================================

/// An opaque record keyed by `id`.
///
/// Serialized as a flat JSON object: `{ "id": "...", ...fields }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier.
    pub id: EntityId,
    /// All other fields, untouched.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entity {
    /// Creates an entity from an id and its fields.
    ///
    /// An `id` key inside `fields` is dropped; the explicit id wins.
    #[must_use]
    pub fn new(id: EntityId, mut fields: Map<String, Value>) -> Self {
        fields.remove("id");
        Self { id, fields }
    }

    /// Synthesizes a provisional entity for an in-flight create.
    #[must_use]
    pub fn provisional(id: EntityId, payload: &Map<String, Value>) -> Self {
        debug_assert!(id.is_provisional());
        Self::new(id, payload.clone())
    }

    /// Builds an entity from a server response.
    ///
    /// Returns `None` when the response is not an object or carries no usable
    /// `id` (string or number).
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut fields) = value else {
            return None;
        };
        let id = match fields.remove("id")? {
            Value::String(id) if !id.is_empty() => EntityId::new(id),
            Value::Number(number) => EntityId::new(number.to_string()),
            _ => return None,
        };
        Some(Self { id, fields })
    }

    /// Returns a copy with `patch` shallow-merged over the current fields.
    ///
    /// The id never changes.
    #[must_use]
    pub fn merged(&self, patch: &Map<String, Value>) -> Self {
        let mut fields = self.fields.clone();
        for (key, value) in patch {
            if key != "id" {
                fields.insert(key.clone(), value.clone());
            }
        }
        Self {
            id: self.id.clone(),
            fields,
        }
    }

    /// Returns a copy whose non-id fields are exactly `patch`.
    #[must_use]
    pub fn replaced(&self, patch: &Map<String, Value>) -> Self {
        Self::new(self.id.clone(), patch.clone())
    }

    /// Returns a field value.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

// =============================================================================
// Provisional Id Generation
// =============================================================================

/// How provisional ids are minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionalIdStrategy {
    /// `temp-<unix millis>`. Two creates within the same millisecond collide.
    Timestamp,
    /// `temp-<uuid v7>`. Unique per mutation.
    #[default]
    Unique,
}

impl FromStr for ProvisionalIdStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace('_', "-").as_str() {
            "timestamp" => Ok(Self::Timestamp),
            "unique" | "uuid" => Ok(Self::Unique),
            _ => Err(format!("Unknown provisional id strategy: {value}")),
        }
    }
}

impl std::fmt::Display for ProvisionalIdStrategy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timestamp => write!(formatter, "timestamp"),
            Self::Unique => write!(formatter, "unique"),
        }
    }
}

/// Source of provisional ids.
pub trait ProvisionalIdGenerator: Send + Sync {
    /// Mints the next provisional id. The result always starts with
    /// [`PROVISIONAL_PREFIX`].
    fn next_id(&self) -> EntityId;
}

/// Wall-clock generator: `temp-<millis>`.
#[derive(Debug, Default)]
pub struct TimestampIds;

impl ProvisionalIdGenerator for TimestampIds {
    fn next_id(&self) -> EntityId {
        EntityId::new(format!(
            "{PROVISIONAL_PREFIX}{}",
            Utc::now().timestamp_millis()
        ))
    }
}

/// Collision-free generator: `temp-<uuid v7>`.
#[derive(Debug, Default)]
pub struct UniqueIds;

impl ProvisionalIdGenerator for UniqueIds {
    fn next_id(&self) -> EntityId {
        EntityId::new(format!("{PROVISIONAL_PREFIX}{}", Uuid::now_v7()))
    }
}

/// Deterministic generator for tests: `temp-1`, `temp-2`, ...
#[derive(Debug, Default)]
pub struct SequentialIds {
    counter: AtomicU64,
}

impl SequentialIds {
    /// Creates a generator starting at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }
}

impl ProvisionalIdGenerator for SequentialIds {
    fn next_id(&self) -> EntityId {
        let next = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        EntityId::new(format!("{PROVISIONAL_PREFIX}{next}"))
    }
}

/// Returns the generator for a strategy.
#[must_use]
pub fn generator_for(strategy: ProvisionalIdStrategy) -> Box<dyn ProvisionalIdGenerator> {
    match strategy {
        ProvisionalIdStrategy::Timestamp => Box::new(TimestampIds),
        ProvisionalIdStrategy::Unique => Box::new(UniqueIds),
    }
}

// =============================================================================
// Tests
// =============================================================================
