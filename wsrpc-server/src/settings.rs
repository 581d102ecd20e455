//! In-memory property store.
//!
//! Serves as both the command handler and the state store behind the
//! engine. Properties are a flat JSON object; every mutation that changes
//! at least one value emits an object holding just the changed properties.

use crate::broadcast::StateStore;
use crate::handler::{CommandHandler, CommandOutcome};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use wsrpc_protocol::ErrorKind;

/// Default change channel capacity.
pub const DEFAULT_CHANGE_CAPACITY: usize = 64;

/// Property store with change events.
pub struct SettingsStore {
    properties: RwLock<Map<String, Value>>,
    changes: broadcast::Sender<Value>,
}

impl SettingsStore {
    pub fn new(capacity: usize) -> Self {
        Self::with_properties(Map::new(), capacity)
    }

    /// Creates a store seeded with initial properties.
    pub fn with_properties(properties: Map<String, Value>, capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            properties: RwLock::new(properties),
            changes,
        }
    }

    /// Returns one property.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.properties.read().get(key).cloned()
    }

    /// Merges properties into the store.
    ///
    /// Returns the properties whose value changed. A change event is emitted
    /// only when that set is non-empty.
    pub fn set(&self, updates: Map<String, Value>) -> Map<String, Value> {
        let mut changed = Map::new();
        {
            let mut properties = self.properties.write();
            for (key, value) in updates {
                if properties.get(&key) == Some(&value) {
                    continue;
                }
                properties.insert(key.clone(), value.clone());
                changed.insert(key, value);
            }
        }

        if !changed.is_empty() {
            tracing::debug!("{} properties changed", changed.len());
            // No subscribers is fine
            let _ = self.changes.send(Value::Object(changed.clone()));
        }
        changed
    }

    /// Returns the number of properties.
    pub fn len(&self) -> usize {
        self.properties.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.read().is_empty()
    }

    fn handle_get(&self, params: Option<&Value>) -> CommandOutcome {
        let keys = match params {
            None | Some(Value::Null) => return (ErrorKind::NoError, Some(self.snapshot())),
            Some(Value::Array(keys)) => keys,
            Some(_) => return invalid_params("params must be an array of property names"),
        };

        let properties = self.properties.read();
        let mut selected = Map::new();
        for key in keys {
            let Some(key) = key.as_str() else {
                return invalid_params("property names must be strings");
            };
            if let Some(value) = properties.get(key) {
                selected.insert(key.to_string(), value.clone());
            }
        }
        (ErrorKind::NoError, Some(Value::Object(selected)))
    }

    fn handle_set(&self, params: Option<&Value>) -> CommandOutcome {
        match params {
            Some(Value::Object(updates)) => {
                let changed = self.set(updates.clone());
                (ErrorKind::NoError, Some(Value::Object(changed)))
            }
            _ => invalid_params("params must be an object of properties"),
        }
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(DEFAULT_CHANGE_CAPACITY)
    }
}

fn invalid_params(message: &str) -> CommandOutcome {
    (ErrorKind::InvalidParams, Some(json!(message)))
}

impl CommandHandler for SettingsStore {
    fn execute_command(&self, method: &str, params: Option<&Value>) -> CommandOutcome {
        match method {
            "ping" => (ErrorKind::NoError, Some(json!("pong"))),
            "get" => self.handle_get(params),
            "set" => self.handle_set(params),
            "state" => (ErrorKind::NoError, Some(self.snapshot())),
            _ => (ErrorKind::MethodNotFound, Some(json!("unknown method"))),
        }
    }
}

impl StateStore for SettingsStore {
    fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.changes.subscribe()
    }

    fn snapshot(&self) -> Value {
        Value::Object(self.properties.read().clone())
    }
}
