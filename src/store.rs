//! In-memory entity state registry
//!
//! `EntityStore` implements the host traits on top of a plain map of entity
//! states. The binary uses it as its host: an external bridge pushes sensor
//! states over HTTP and picks up output commands from the same store. Tests
//! use it to script sensors and to simulate outputs that never confirm.

use crate::error::{BalancerError, Result};
use crate::host::{Actuator, ChangeNotifier, EntityValue, SensorAccessor, Subscription};
use crate::logging::get_logger;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;

/// A command the store received through [`Actuator::set_value`]
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRecord {
    pub entity_id: String,
    pub value: EntityValue,
}

type Listener = (u64, mpsc::UnboundedSender<EntityValue>);

#[derive(Default)]
struct StoreState {
    states: HashMap<String, EntityValue>,
    listeners: HashMap<String, Vec<Listener>>,
    /// Outputs that accept commands without ever changing state
    held: HashSet<String>,
    /// Outputs that reject commands outright
    rejecting: HashSet<String>,
    commands: Vec<CommandRecord>,
}

struct StoreInner {
    state: Mutex<StoreState>,
    next_listener_id: AtomicU64,
}

impl StoreInner {
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared, cheaply cloneable entity registry
#[derive(Clone)]
pub struct EntityStore {
    inner: Arc<StoreInner>,
    logger: crate::logging::StructuredLogger,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState::default()),
                next_listener_id: AtomicU64::new(1),
            }),
            logger: get_logger("store"),
        }
    }

    /// Seed a store from `(entity_id, value)` pairs
    pub fn with_states<I, K, V>(states: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<EntityValue>,
    {
        let store = Self::new();
        for (id, value) in states {
            store.set_state(&id.into(), value.into());
        }
        store
    }

    /// Set the state of an entity, notifying subscribers when it changed
    pub fn set_state(&self, entity_id: &str, value: EntityValue) {
        let mut state = self.inner.lock();
        let changed = state.states.get(entity_id) != Some(&value);
        state.states.insert(entity_id.to_string(), value.clone());
        if !changed {
            return;
        }
        if let Some(listeners) = state.listeners.get_mut(entity_id) {
            listeners.retain(|(_, tx)| tx.send(value.clone()).is_ok());
        }
    }

    pub fn get_state(&self, entity_id: &str) -> Option<EntityValue> {
        self.inner.lock().states.get(entity_id).cloned()
    }

    pub fn remove(&self, entity_id: &str) -> Option<EntityValue> {
        self.inner.lock().states.remove(entity_id)
    }

    /// All entity states, sorted by entity id
    pub fn states(&self) -> Vec<(String, EntityValue)> {
        let state = self.inner.lock();
        let mut all: Vec<_> = state
            .states
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Accept commands for `entity_id` but never apply them
    pub fn hold(&self, entity_id: &str) {
        self.inner.lock().held.insert(entity_id.to_string());
    }

    /// Reject every command for `entity_id`
    pub fn reject(&self, entity_id: &str) {
        self.inner.lock().rejecting.insert(entity_id.to_string());
    }

    /// Undo [`hold`](Self::hold) and [`reject`](Self::reject)
    pub fn release(&self, entity_id: &str) {
        let mut state = self.inner.lock();
        state.held.remove(entity_id);
        state.rejecting.remove(entity_id);
    }

    /// Commands received so far, oldest first
    pub fn commands(&self) -> Vec<CommandRecord> {
        self.inner.lock().commands.clone()
    }

    pub fn commands_for(&self, entity_id: &str) -> Vec<EntityValue> {
        self.inner
            .lock()
            .commands
            .iter()
            .filter(|c| c.entity_id == entity_id)
            .map(|c| c.value.clone())
            .collect()
    }

    /// Number of live subscriptions for an entity
    pub fn listener_count(&self, entity_id: &str) -> usize {
        self.inner
            .lock()
            .listeners
            .get(entity_id)
            .map_or(0, Vec::len)
    }

    fn unsubscribe(inner: &Weak<StoreInner>, entity_id: &str, id: u64) {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut state = inner.lock();
        if let Some(listeners) = state.listeners.get_mut(entity_id) {
            listeners.retain(|(lid, _)| *lid != id);
            if listeners.is_empty() {
                state.listeners.remove(entity_id);
            }
        }
    }
}

#[async_trait::async_trait]
impl SensorAccessor for EntityStore {
    async fn read(&self, entity_id: &str) -> Option<EntityValue> {
        self.get_state(entity_id)
    }
}

#[async_trait::async_trait]
impl Actuator for EntityStore {
    async fn set_value(&self, entity_id: &str, value: EntityValue) -> Result<()> {
        let (held, rejecting, known) = {
            let mut state = self.inner.lock();
            state.commands.push(CommandRecord {
                entity_id: entity_id.to_string(),
                value: value.clone(),
            });
            (
                state.held.contains(entity_id),
                state.rejecting.contains(entity_id),
                state.states.contains_key(entity_id),
            )
        };
        if !known {
            return Err(BalancerError::actuation(format!(
                "Unknown output entity {}",
                entity_id
            )));
        }
        if rejecting {
            return Err(BalancerError::actuation(format!(
                "Output {} rejected value {}",
                entity_id, value
            )));
        }
        if held {
            self.logger.debug(&format!(
                "Output {} is held; command {} not applied",
                entity_id, value
            ));
            return Ok(());
        }
        self.set_state(entity_id, value);
        Ok(())
    }
}

impl ChangeNotifier for EntityStore {
    fn subscribe(&self, entity_id: &str) -> Subscription {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .listeners
            .entry(entity_id.to_string())
            .or_default()
            .push((id, tx));
        let weak = Arc::downgrade(&self.inner);
        let key = entity_id.to_string();
        Subscription::new(entity_id, rx, move || {
            EntityStore::unsubscribe(&weak, &key, id)
        })
    }
}
