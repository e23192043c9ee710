//! Builds a store from an initializer function.

use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use super::action::{async_body, sync_body, wrap_action, ActionBody, Outcome};
use super::container::{Container, PluginContext};
use super::error::{ActionError, Result, StoreError};
use super::state::StateMap;
use super::store::{MutationState, StoreInner};
use super::subscriptions::SubscriptionList;
use super::Store;
use crate::runtime::{EffectScope, ReactiveRuntime};
use crate::signal::Memo;

pub(crate) type GetterFn = Arc<dyn Fn(&Store) -> Value + Send + Sync>;

/// An initializer for a setup-style store.
pub type SetupFn = Arc<dyn Fn(&mut SetupContext) -> Result<(), ActionError> + Send + Sync>;

/// The raw surface an initializer declares: state fields, getters, actions.
///
/// The initializer runs inside the store's own lifecycle scope, so effects
/// it creates stop when the store is disposed.
pub struct SetupContext {
    id: String,
    state: StateMap,
    getters: IndexMap<String, GetterFn>,
    actions: IndexMap<String, ActionBody>,
}

impl SetupContext {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Declare a state field. A value already recorded for it in the
    /// container wins over `initial`.
    pub fn state(&mut self, name: impl Into<String>, initial: impl Into<Value>) -> &mut Self {
        self.state.insert_if_absent(&name.into(), initial.into(), false);
        self
    }

    /// Declare a state field that patches replace instead of merging into.
    pub fn opaque_state(&mut self, name: impl Into<String>, initial: impl Into<Value>) -> &mut Self {
        let name = name.into();
        self.state.insert_if_absent(&name, initial.into(), true);
        self.state.mark_opaque(&name);
        self
    }

    /// Current value of a declared field.
    pub fn read(&self, name: &str) -> Option<Value> {
        self.state.get_untracked(name)
    }

    /// Declare a getter, recomputed only when the state it reads changes.
    pub fn getter<F>(&mut self, name: impl Into<String>, getter: F) -> &mut Self
    where
        F: Fn(&Store) -> Value + Send + Sync + 'static,
    {
        self.getters.insert(name.into(), Arc::new(getter));
        self
    }

    pub fn action<F>(&mut self, name: impl Into<String>, action: F) -> &mut Self
    where
        F: Fn(&Store, &[Value]) -> Result<Value, ActionError> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), sync_body(action));
        self
    }

    pub fn async_action<F, Fut>(&mut self, name: impl Into<String>, action: F) -> &mut Self
    where
        F: Fn(Store, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActionError>> + Send + 'static,
    {
        self.actions.insert(name.into(), async_body(action));
        self
    }

    /// Declare an action that decides per call whether it completes now or
    /// later.
    pub fn raw_action<F>(&mut self, name: impl Into<String>, action: F) -> &mut Self
    where
        F: Fn(&Store, &[Value]) -> Result<Outcome, ActionError> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(action));
        self
    }

    pub(crate) fn insert_getter(&mut self, name: String, getter: GetterFn) {
        self.getters.insert(name, getter);
    }

    pub(crate) fn insert_action(&mut self, name: String, action: ActionBody) {
        self.actions.insert(name, action);
    }
}

/// Build a store from `setup` and register it in `container`.
pub(crate) fn build_setup_store<F>(id: &str, setup: F, container: &Container) -> Result<Store>
where
    F: FnOnce(&mut SetupContext) -> Result<(), ActionError>,
{
    let disposed = || StoreError::Disposed {
        store: id.to_string(),
    };

    let scope = container
        .scope()
        .run(|| EffectScope::new(false))
        .ok_or_else(disposed)?;

    let seeded = container.has_state(id);
    let mut context = SetupContext {
        id: id.to_string(),
        state: container.state_entry(id),
        getters: IndexMap::new(),
        actions: IndexMap::new(),
    };
    scope
        .run(|| setup(&mut context))
        .ok_or_else(disposed)?
        .map_err(|source| {
            scope.stop();
            if !seeded {
                container.discard_state(id);
            }
            StoreError::Setup {
                store: id.to_string(),
                source,
            }
        })?;

    let SetupContext {
        state,
        getters,
        actions,
        ..
    } = context;

    // Getters need the finished store; they find it through this slot.
    let slot: Arc<OnceLock<Weak<StoreInner>>> = Arc::new(OnceLock::new());
    let getters: IndexMap<String, Memo<Value>> = scope
        .run(|| {
            getters
                .into_iter()
                .map(|(name, getter)| {
                    let slot = Arc::clone(&slot);
                    let memo = Memo::new(move || {
                        match slot.get().and_then(Weak::upgrade) {
                            Some(inner) => getter(&Store { inner }),
                            None => Value::Null,
                        }
                    });
                    (name, memo)
                })
                .collect()
        })
        .ok_or_else(disposed)?;

    let policy = container.options().sync_errors;
    let actions = actions
        .into_iter()
        .map(|(name, body)| {
            let wrapped = wrap_action(name.clone(), body, policy);
            (name, wrapped)
        })
        .collect();

    let inner = Arc::new(StoreInner {
        id: id.to_string(),
        container: container.downgrade(),
        runtime: ReactiveRuntime::current(),
        scope: scope.clone(),
        state,
        getters,
        actions,
        action_listeners: SubscriptionList::new(),
        state_listeners: SubscriptionList::new(),
        extensions: RwLock::new(IndexMap::new()),
        reset: RwLock::new(None),
        mutation: Mutex::new(MutationState::default()),
        disposed: AtomicBool::new(false),
    });
    let _ = slot.set(Arc::downgrade(&inner));
    let store = Store { inner };

    for plugin in container.plugins() {
        let context = PluginContext {
            store: store.clone(),
            container: container.clone(),
            app: container.app(),
            id: id.to_string(),
        };
        if let Some(extensions) = scope.run(|| plugin(&context)) {
            debug!(store = id, count = extensions.len(), "plugin applied");
            store.extend(extensions);
        }
    }

    container.register(store.clone());
    debug!(
        store = id,
        fields = store.field_names().len(),
        getters = store.getter_names().len(),
        actions = store.action_names().len(),
        "store built"
    );
    Ok(store)
}
