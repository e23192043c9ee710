//! Observable state of one store: an ordered map of field name to signal.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::signal::Signal;

struct FieldCell {
    signal: Signal<Value>,
    // Opaque fields are never merged into, only replaced.
    opaque: bool,
}

struct StateInner {
    fields: RwLock<IndexMap<String, FieldCell>>,
    // Bumped whenever a field is added or removed.
    shape: Signal<u64>,
}

/// The state fields of a store, each held in its own [`Signal`].
///
/// Reads through [`get`](StateMap::get) and [`snapshot`](StateMap::snapshot)
/// are tracked per field, so a memo that reads only `count` is not
/// invalidated by writes to `price`.
#[derive(Clone)]
pub struct StateMap {
    inner: Arc<StateInner>,
}

impl Default for StateMap {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMap {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StateInner {
                fields: RwLock::new(IndexMap::new()),
                shape: Signal::new(0),
            }),
        }
    }

    /// Build a map from the entries of a JSON object. Other values yield an
    /// empty map.
    pub fn from_value(value: Value) -> Self {
        let state = Self::new();
        if let Value::Object(entries) = value {
            let mut fields = state.write();
            for (key, value) in entries {
                fields.insert(
                    key,
                    FieldCell {
                        signal: Signal::new(value),
                        opaque: false,
                    },
                );
            }
        }
        state
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, FieldCell>> {
        self.inner
            .fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, FieldCell>> {
        self.inner
            .fields
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn signal(&self, key: &str) -> Option<Signal<Value>> {
        self.read().get(key).map(|cell| cell.signal.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn is_opaque(&self, key: &str) -> bool {
        self.read().get(key).is_some_and(|cell| cell.opaque)
    }

    /// Field names in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.shape.get();
        self.read().keys().cloned().collect()
    }

    /// Tracked read of one field.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.signal(key) {
            Some(signal) => Some(signal.get()),
            None => {
                // Track the shape so a later insert of `key` re-runs the reader.
                self.inner.shape.get();
                None
            }
        }
    }

    pub fn get_untracked(&self, key: &str) -> Option<Value> {
        self.signal(key).map(|signal| signal.get_untracked())
    }

    /// Write one field, creating it when absent. Returns whether anything
    /// changed.
    pub fn set(&self, key: &str, value: Value) -> bool {
        if let Some(signal) = self.signal(key) {
            return signal.set_if_changed(value);
        }
        self.insert(key, value, false);
        true
    }

    /// Create a field unless one already exists under `key`.
    pub fn insert_if_absent(&self, key: &str, value: Value, opaque: bool) -> bool {
        if self.contains(key) {
            return false;
        }
        self.insert(key, value, opaque);
        true
    }

    fn insert(&self, key: &str, value: Value, opaque: bool) {
        let signal = Signal::new(value);
        self.write()
            .insert(key.to_string(), FieldCell { signal, opaque });
        self.inner.shape.update(|version| *version += 1);
    }

    /// Exempt a field from deep merging.
    pub fn mark_opaque(&self, key: &str) {
        if let Some(cell) = self.write().get_mut(key) {
            cell.opaque = true;
        }
    }

    /// Tracked read of every field as one JSON object.
    pub fn snapshot(&self) -> Value {
        self.inner.shape.get();
        let signals: Vec<(String, Signal<Value>)> = self
            .read()
            .iter()
            .map(|(key, cell)| (key.clone(), cell.signal.clone()))
            .collect();

        let mut object = Map::new();
        for (key, signal) in signals {
            object.insert(key, signal.get());
        }
        Value::Object(object)
    }

    /// Recursively merge `partial` into the fields.
    ///
    /// Plain objects on both sides merge key by key; anything else, including
    /// any value of an opaque field, is replaced wholesale.
    pub fn merge(&self, partial: &Map<String, Value>) {
        for (key, incoming) in partial {
            let existing = self.get_untracked(key);
            match existing {
                Some(mut current @ Value::Object(_))
                    if incoming.is_object() && !self.is_opaque(key) =>
                {
                    merge_value(&mut current, incoming);
                    self.set(key, current);
                }
                _ => {
                    self.set(key, incoming.clone());
                }
            }
        }
    }

    /// Overwrite each field named in `value` without merging nested objects.
    pub fn assign(&self, value: &Value) {
        if let Value::Object(entries) = value {
            for (key, value) in entries {
                self.set(key, value.clone());
            }
        }
    }
}

impl std::fmt::Debug for StateMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.read().keys().cloned().collect();
        f.debug_struct("StateMap").field("fields", &keys).finish()
    }
}

/// Deep-merge `partial` into `target`: objects merge, everything else
/// replaces.
pub(crate) fn merge_value(target: &mut Value, partial: &Value) {
    match (target, partial) {
        (Value::Object(target), Value::Object(partial)) => {
            for (key, incoming) in partial {
                let both_objects =
                    incoming.is_object() && target.get(key).is_some_and(Value::is_object);
                match target.get_mut(key) {
                    Some(existing) if both_objects => merge_value(existing, incoming),
                    _ => {
                        target.insert(key.clone(), incoming.clone());
                    }
                }
            }
        }
        (target, partial) => *target = partial.clone(),
    }
}
