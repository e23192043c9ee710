//! Option-style stores: a declarative `{ state, getters, actions }`
//! descriptor adapted onto the setup builder.

use std::future::Future;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::action::{async_body, sync_body, ActionBody, Outcome};
use super::container::Container;
use super::error::{ActionError, Result};
use super::setup::{build_setup_store, GetterFn};
use super::store::StateFactory;
use super::Store;

/// Declarative store descriptor.
///
/// ```
/// use serde_json::json;
/// use stockroom::StoreOptions;
///
/// let options = StoreOptions::with_id("todos")
///     .state(|| json!({ "items": [] }))
///     .getter("count", |store| {
///         json!(store.get("items").and_then(|v| v.as_array().map(Vec::len)).unwrap_or(0))
///     })
///     .action("clear", |store, _args| {
///         store.set("items", json!([]))?;
///         Ok(json!(null))
///     });
/// assert_eq!(options.id(), Some("todos"));
/// ```
#[derive(Clone, Default)]
pub struct StoreOptions {
    id: Option<String>,
    state: Option<StateFactory>,
    getters: IndexMap<String, GetterFn>,
    actions: IndexMap<String, ActionBody>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// A descriptor that carries its own store id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Factory for the initial state. Must produce a JSON object.
    pub fn state<F>(mut self, state: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.state = Some(Arc::new(state));
        self
    }

    pub fn getter<F>(mut self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&Store) -> Value + Send + Sync + 'static,
    {
        self.getters.insert(name.into(), Arc::new(getter));
        self
    }

    pub fn action<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&Store, &[Value]) -> Result<Value, ActionError> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), sync_body(action));
        self
    }

    pub fn async_action<F, Fut>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(Store, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        self.actions.insert(name.into(), async_body(action));
        self
    }

    pub fn raw_action<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&Store, &[Value]) -> Result<Outcome, ActionError> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(action));
        self
    }

    fn initial_state(&self) -> Value {
        match &self.state {
            Some(state) => state(),
            None => Value::Object(Map::new()),
        }
    }
}

/// Build an option-style store: state seeded into the container when absent,
/// actions taken verbatim, getters turned into memos, plus `reset`.
pub(crate) fn build_options_store(
    id: &str,
    options: &StoreOptions,
    container: &Container,
) -> Result<Store> {
    let store = build_setup_store(
        id,
        |ctx| {
            if let Value::Object(fields) = options.initial_state() {
                for (name, value) in fields {
                    ctx.state(name, value);
                }
            }
            for (name, action) in &options.actions {
                ctx.insert_action(name.clone(), Arc::clone(action));
            }
            for (name, getter) in &options.getters {
                ctx.insert_getter(name.clone(), Arc::clone(getter));
            }
            Ok(())
        },
        container,
    )?;

    let options = options.clone();
    store.set_reset(Arc::new(move || options.initial_state()));
    Ok(store)
}
