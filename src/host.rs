//! Host platform interfaces
//!
//! The load balancer never talks to hardware directly. It reads sensor
//! entities, commands output entities and listens for state changes through
//! the traits in this module, which the host platform (or the in-memory
//! [`crate::store::EntityStore`]) implements.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// State tokens the host reports for entities without a usable value
pub const STATE_UNAVAILABLE: &str = "unavailable";
pub const STATE_UNKNOWN: &str = "unknown";

/// Current state of a host entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawState", into = "RawState")]
pub enum EntityValue {
    /// Entity exists but the host has no value for it
    Unavailable,
    /// Entity exists but its value has not been reported yet
    Unknown,
    Number(f64),
    Text(String),
}

impl EntityValue {
    /// Parse a raw host state string.
    ///
    /// Numeric strings become [`EntityValue::Number`]; the `unavailable` and
    /// `unknown` tokens map to their variants; everything else is text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            STATE_UNAVAILABLE => return EntityValue::Unavailable,
            STATE_UNKNOWN | "none" | "" => return EntityValue::Unknown,
            _ => {}
        }
        match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => EntityValue::Number(v),
            _ => EntityValue::Text(trimmed.to_string()),
        }
    }

    /// Whether the entity currently reports a usable value
    pub fn is_available(&self) -> bool {
        !matches!(self, EntityValue::Unavailable | EntityValue::Unknown)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EntityValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Compare against a commanded value. Numbers match within `tolerance`,
    /// everything else by its textual state.
    pub fn matches(&self, target: &EntityValue, tolerance: f64) -> bool {
        match (self, target) {
            (EntityValue::Number(a), EntityValue::Number(b)) => (a - b).abs() <= tolerance.max(0.0),
            _ => self.to_string() == target.to_string(),
        }
    }
}

impl fmt::Display for EntityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityValue::Unavailable => f.write_str(STATE_UNAVAILABLE),
            EntityValue::Unknown => f.write_str(STATE_UNKNOWN),
            EntityValue::Number(v) => write!(f, "{}", v),
            EntityValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for EntityValue {
    fn from(v: f64) -> Self {
        EntityValue::Number(v)
    }
}

impl From<&str> for EntityValue {
    fn from(raw: &str) -> Self {
        EntityValue::parse(raw)
    }
}

/// Wire representation: hosts send either JSON numbers or state strings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawState {
    Number(f64),
    Text(String),
    Null(()),
}

impl From<RawState> for EntityValue {
    fn from(raw: RawState) -> Self {
        match raw {
            RawState::Number(v) if v.is_finite() => EntityValue::Number(v),
            RawState::Number(_) | RawState::Null(()) => EntityValue::Unknown,
            RawState::Text(s) => EntityValue::parse(&s),
        }
    }
}

impl From<EntityValue> for RawState {
    fn from(value: EntityValue) -> Self {
        match value {
            EntityValue::Number(v) => RawState::Number(v),
            other => RawState::Text(other.to_string()),
        }
    }
}

/// Reads the current state of host entities
#[async_trait::async_trait]
pub trait SensorAccessor: Send + Sync {
    /// Current state of `entity_id`, or `None` when the host has no such entity
    async fn read(&self, entity_id: &str) -> Option<EntityValue>;
}

/// Issues commands to host output entities.
///
/// Commands are fire-and-forget: `Ok` only means the host accepted the
/// command. Whether the output followed is confirmed separately by watching
/// its state.
#[async_trait::async_trait]
pub trait Actuator: Send + Sync {
    async fn set_value(&self, entity_id: &str, value: EntityValue) -> Result<()>;
}

/// Delivers state changes of a single entity
pub trait ChangeNotifier: Send + Sync {
    fn subscribe(&self, entity_id: &str) -> Subscription;
}

/// Everything the coordinator needs from the host platform
pub trait EntityHost: SensorAccessor + Actuator + ChangeNotifier {}

impl<T: SensorAccessor + Actuator + ChangeNotifier + ?Sized> EntityHost for T {}

/// Change feed for one entity. Dropping it unsubscribes.
pub struct Subscription {
    entity_id: String,
    rx: mpsc::UnboundedReceiver<EntityValue>,
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new<F>(entity_id: &str, rx: mpsc::UnboundedReceiver<EntityValue>, unsubscribe: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            entity_id: entity_id.to_string(),
            rx,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Next observed value, or `None` once the host closed the feed
    pub async fn changed(&mut self) -> Option<EntityValue> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("entity_id", &self.entity_id)
            .finish()
    }
}
