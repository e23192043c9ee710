use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::debug;

use super::config::ContainerOptions;
use super::context::{set_active_container, CONTAINER_GLOBAL, CONTAINER_KEY};
use super::state::StateMap;
use super::Store;
use crate::runtime::{App, EffectScope};

/// Properties a plugin merges onto a store.
pub type Extensions = IndexMap<String, Value>;

pub(crate) type Plugin = Arc<dyn Fn(&PluginContext) -> Extensions + Send + Sync>;

/// What a plugin sees while a store is being built.
pub struct PluginContext {
    pub store: Store,
    pub container: Container,
    pub app: Option<App>,
    pub id: String,
}

pub(crate) struct ContainerInner {
    scope: EffectScope,
    state: RwLock<IndexMap<String, StateMap>>,
    stores: RwLock<IndexMap<String, Store>>,
    plugins: RwLock<Vec<Plugin>>,
    app: RwLock<Option<App>>,
    options: ContainerOptions,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Owns every store of one application: their state, the store instances,
/// the plugin list, and the root lifecycle scope.
///
/// Cloning yields another handle to the same container.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    pub fn new() -> Self {
        Self::with_options(ContainerOptions::default())
    }

    pub fn with_options(options: ContainerOptions) -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                scope: EffectScope::new(true),
                state: RwLock::new(IndexMap::new()),
                stores: RwLock::new(IndexMap::new()),
                plugins: RwLock::new(Vec::new()),
                app: RwLock::new(None),
                options,
            }),
        }
    }

    pub(crate) fn upgrade(weak: &Weak<ContainerInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn downgrade(&self) -> Weak<ContainerInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn options(&self) -> &ContainerOptions {
        &self.inner.options
    }

    pub(crate) fn scope(&self) -> &EffectScope {
        &self.inner.scope
    }

    /// Attach the container to a host app.
    ///
    /// Makes it the active container, provides it to every component of the
    /// app, and publishes it as the app's `$container` global.
    pub fn install(&self, app: &App) {
        set_active_container(Some(self.clone()));
        *write(&self.inner.app) = Some(app.clone());
        app.provide(CONTAINER_KEY, self.clone());
        app.set_global(CONTAINER_GLOBAL, self.clone());
        debug!(app = app.name(), "container installed");
    }

    pub fn app(&self) -> Option<App> {
        read(&self.inner.app).clone()
    }

    /// Register a plugin for every store built from now on.
    pub fn use_plugin<F>(&self, plugin: F) -> &Self
    where
        F: Fn(&PluginContext) -> Extensions + Send + Sync + 'static,
    {
        write(&self.inner.plugins).push(Arc::new(plugin));
        self
    }

    pub(crate) fn plugins(&self) -> Vec<Plugin> {
        read(&self.inner.plugins).clone()
    }

    pub fn has_store(&self, id: &str) -> bool {
        read(&self.inner.stores).contains_key(id)
    }

    pub fn store(&self, id: &str) -> Option<Store> {
        read(&self.inner.stores).get(id).cloned()
    }

    pub fn store_ids(&self) -> Vec<String> {
        read(&self.inner.stores).keys().cloned().collect()
    }

    pub(crate) fn register(&self, store: Store) {
        write(&self.inner.stores).insert(store.id().to_string(), store);
    }

    /// Drop the entries of a disposed store.
    pub(crate) fn forget(&self, store: &Store) {
        let mut stores = write(&self.inner.stores);
        if stores.get(store.id()).is_some_and(|live| live.ptr_eq(store)) {
            stores.shift_remove(store.id());
            write(&self.inner.state).shift_remove(store.id());
        }
    }

    pub(crate) fn has_state(&self, id: &str) -> bool {
        read(&self.inner.state).contains_key(id)
    }

    /// Drop the state recorded under `id` by a build that did not finish.
    pub(crate) fn discard_state(&self, id: &str) {
        if write(&self.inner.state).shift_remove(id).is_some() {
            debug!(store = id, "discarded state of failed build");
        }
    }

    /// The state map for `id`, created empty when absent.
    pub(crate) fn state_entry(&self, id: &str) -> StateMap {
        if let Some(state) = read(&self.inner.state).get(id) {
            return state.clone();
        }
        write(&self.inner.state)
            .entry(id.to_string())
            .or_default()
            .clone()
    }

    /// Untracked snapshot of the state recorded under `id`.
    pub fn state_of(&self, id: &str) -> Option<Value> {
        let state = read(&self.inner.state).get(id).cloned()?;
        let mut object = Map::new();
        for key in state.keys() {
            if let Some(value) = state.get_untracked(&key) {
                object.insert(key, value);
            }
        }
        Some(Value::Object(object))
    }

    /// Snapshot of the root state: store id to that store's state.
    pub fn state_snapshot(&self) -> Value {
        let ids: Vec<String> = read(&self.inner.state).keys().cloned().collect();
        let mut root = Map::new();
        for id in ids {
            if let Some(state) = self.state_of(&id) {
                root.insert(id, state);
            }
        }
        Value::Object(root)
    }

    /// Seed the state of `id` from outside, e.g. after restoring it.
    ///
    /// Fields of a store built later are initialized from it instead of from
    /// their declared defaults. If the store is already live its fields are
    /// overwritten in one patch.
    pub fn hydrate(&self, id: &str, state: Value) {
        if let Some(store) = self.store(id) {
            store.set_state(state);
            return;
        }
        write(&self.inner.state).insert(id.to_string(), StateMap::from_value(state));
        debug!(store = id, "state hydrated");
    }

    /// Dispose every store and stop the root scope.
    pub fn dispose(&self) {
        let stores: Vec<Store> = read(&self.inner.stores).values().cloned().collect();
        for store in stores {
            store.dispose();
        }
        self.inner.scope.stop();
        debug!("container disposed");
    }

    pub fn is_disposed(&self) -> bool {
        !self.inner.scope.is_active()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("stores", &self.store_ids())
            .field("plugins", &read(&self.inner.plugins).len())
            .field("app", &read(&self.inner.app))
            .finish()
    }
}
