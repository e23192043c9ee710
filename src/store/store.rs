use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use super::action::{ActionContext, ActionListener, Completion, WrappedAction};
use super::container::{Container, ContainerInner};
use super::error::{Result, StoreError};
use super::state::StateMap;
use super::subscriptions::{SubscriptionList, Unsubscribe};
use crate::runtime::{EffectScope, ReactiveRuntime};
use crate::signal::{Effect, Memo};

pub(crate) type StateFactory = Arc<dyn Fn() -> Value + Send + Sync>;
type StateListener = dyn Fn(&MutationEvent, &Value) + Send + Sync;

/// How a store's state was changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// A field was assigned directly through [`Store::set`].
    Direct,
    /// [`Store::patch`] merged an object into the state.
    PatchObject,
    /// [`Store::patch_with`], [`Store::set_state`], or [`Store::reset`].
    PatchFunction,
}

/// Delivered to state subscribers alongside the new state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationEvent {
    pub kind: MutationKind,
    pub store_id: String,
}

/// Options for [`Store::subscribe`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    /// Keep the subscription past the unmount of the current component.
    pub detached: bool,
    /// Call the subscriber once right away with the current state.
    pub immediate: bool,
}

impl SubscribeOptions {
    pub fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

/// The kind of the latest mutation, read by subscribers when they flush.
///
/// `depth` counts the patches in progress; writes made inside a patch keep
/// the patch's kind.
#[derive(Debug, Default)]
pub(crate) struct MutationState {
    depth: usize,
    kind: Option<MutationKind>,
}

pub(crate) struct StoreInner {
    pub(super) id: String,
    pub(super) container: Weak<ContainerInner>,
    pub(super) runtime: Arc<ReactiveRuntime>,
    pub(super) scope: EffectScope,
    pub(super) state: StateMap,
    pub(super) getters: IndexMap<String, Memo<Value>>,
    pub(super) actions: IndexMap<String, WrappedAction>,
    pub(super) action_listeners: SubscriptionList<ActionListener>,
    pub(super) state_listeners: SubscriptionList<StateListener>,
    pub(super) extensions: RwLock<IndexMap<String, Value>>,
    pub(super) reset: RwLock<Option<StateFactory>>,
    pub(super) mutation: Mutex<MutationState>,
    pub(super) disposed: AtomicBool,
}

/// A live store: state fields, derived getters, intercepted actions, and the
/// meta operations shared by every store.
///
/// Cloning a `Store` yields another handle to the same instance; use
/// [`ptr_eq`](Store::ptr_eq) to compare identity.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use stockroom::{define_store, Container, StoreOptions};
///
/// let use_counter = define_store(
///     "counter",
///     StoreOptions::new()
///         .state(|| json!({ "count": 10, "price": 100 }))
///         .getter("total", |store| {
///             let count = store.get("count").and_then(|v| v.as_i64()).unwrap_or(0);
///             let price = store.get("price").and_then(|v| v.as_i64()).unwrap_or(0);
///             json!(count * price)
///         }),
/// );
///
/// let container = Container::new();
/// let store = use_counter.use_store_in(&container).unwrap();
/// assert_eq!(store.get("total"), Some(json!(1000)));
///
/// store.patch(json!({ "count": 20 }));
/// assert_eq!(store.get("total"), Some(json!(2000)));
/// ```
#[derive(Clone)]
pub struct Store {
    pub(super) inner: Arc<StoreInner>,
}

impl Store {
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// The container this store was built in, while it is alive.
    pub fn container(&self) -> Option<Container> {
        Container::upgrade(&self.inner.container)
    }

    pub(crate) fn action_listeners(&self) -> &SubscriptionList<ActionListener> {
        &self.inner.action_listeners
    }

    /// Tracked read of a property.
    ///
    /// Plugin extensions shadow state fields, which shadow getters.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.extension(name) {
            return Some(value);
        }
        if let Some(value) = self.inner.state.get(name) {
            return Some(value);
        }
        self.inner.getters.get(name).map(Memo::get)
    }

    /// Assign a state field, creating it when absent.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        if self.inner.getters.contains_key(name) {
            return Err(StoreError::ReadOnly {
                store: self.inner.id.clone(),
                name: name.to_string(),
            });
        }
        {
            let mut mutation = self.mutation_state();
            if mutation.depth == 0 {
                mutation.kind = Some(MutationKind::Direct);
            }
        }
        self.inner.state.set(name, value.into());
        Ok(())
    }

    /// Read a getter, skipping fields and extensions of the same name.
    pub fn getter(&self, name: &str) -> Option<Value> {
        self.inner.getters.get(name).map(Memo::get)
    }

    /// A value merged onto the store by a plugin.
    pub fn extension(&self, name: &str) -> Option<Value> {
        self.inner
            .extensions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub(crate) fn extend(&self, extensions: IndexMap<String, Value>) {
        self.inner
            .extensions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(extensions);
    }

    pub fn field_names(&self) -> Vec<String> {
        self.inner.state.keys()
    }

    pub fn getter_names(&self) -> Vec<&str> {
        self.inner.getters.keys().map(String::as_str).collect()
    }

    pub fn action_names(&self) -> Vec<&str> {
        self.inner.actions.keys().map(String::as_str).collect()
    }

    /// The state this store recorded in its container, as one object.
    ///
    /// Empty once the store is disposed or its container is gone.
    pub fn state(&self) -> Value {
        self.container()
            .and_then(|container| container.state_of(&self.inner.id))
            .unwrap_or_else(|| Value::Object(Map::new()))
    }

    /// Overwrite every field named in `state`.
    pub fn set_state(&self, state: Value) {
        self.patch_with(|store| store.inner.state.assign(&state));
    }

    /// Deep-merge `partial` into the state.
    ///
    /// Nested plain objects merge; arrays, scalars, and opaque fields are
    /// replaced. Subscribers hear about the whole patch once.
    pub fn patch(&self, partial: Value) {
        let Value::Object(partial) = partial else {
            debug!(store = %self.inner.id, "ignoring non-object patch");
            return;
        };
        trace!(store = %self.inner.id, keys = partial.len(), "patch");
        self.mutate(MutationKind::PatchObject, || self.inner.state.merge(&partial));
    }

    /// Mutate the store through `f` as one patch.
    pub fn patch_with(&self, f: impl FnOnce(&Store)) {
        trace!(store = %self.inner.id, "patch with function");
        self.mutate(MutationKind::PatchFunction, || f(self));
    }

    // The kind outlives the call so a flush deferred by an enclosing batch
    // still reports it.
    fn mutate(&self, kind: MutationKind, f: impl FnOnce()) {
        {
            let mut mutation = self.mutation_state();
            if mutation.depth == 0 {
                mutation.kind = Some(kind);
            }
            mutation.depth += 1;
        }
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.inner.runtime.batch(f)
        }));
        {
            let mut mutation = self.mutation_state();
            mutation.depth = mutation.depth.saturating_sub(1);
        }
        if let Err(e) = result {
            std::panic::resume_unwind(e);
        }
    }

    fn mutation_state(&self) -> MutexGuard<'_, MutationState> {
        self.inner
            .mutation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn current_mutation(&self) -> MutationKind {
        self.mutation_state().kind.unwrap_or(MutationKind::Direct)
    }

    /// Call `callback` after every change to the state.
    pub fn subscribe<F>(&self, callback: F, options: SubscribeOptions) -> Unsubscribe
    where
        F: Fn(&MutationEvent, &Value) + Send + Sync + 'static,
    {
        let callback: Arc<StateListener> = Arc::new(callback);
        let state = self.inner.state.clone();
        let runtime = Arc::clone(&self.inner.runtime);
        let store = Arc::downgrade(&self.inner);
        let listener = Arc::clone(&callback);
        let first_run = AtomicBool::new(true);

        let watcher = self.inner.scope.run(|| {
            Effect::new(move || {
                let snapshot = state.snapshot();
                if first_run.swap(false, Ordering::SeqCst) && !options.immediate {
                    return;
                }
                let Some(store) = store.upgrade().map(|inner| Store { inner }) else {
                    return;
                };
                let event = MutationEvent {
                    kind: store.current_mutation(),
                    store_id: store.inner.id.clone(),
                };
                runtime.untracked(|| listener(&event, &snapshot));
            })
        });

        let scope = self.inner.scope.clone();
        let watcher_id = watcher.as_ref().map(Effect::id);
        self.inner
            .state_listeners
            .add_with_cleanup(callback, options.detached, move || {
                if let Some(id) = watcher_id {
                    scope.release(id);
                }
            })
    }

    /// Call `listener` before every action, letting it register after and
    /// error hooks for that call.
    pub fn on_action<F>(&self, listener: F, detached: bool) -> Unsubscribe
    where
        F: Fn(&ActionContext) + Send + Sync + 'static,
    {
        self.inner.action_listeners.add(Arc::new(listener), detached)
    }

    /// Invoke an action through its interception wrapper.
    pub fn call(&self, action: &str, args: &[Value]) -> Result<Completion> {
        let wrapped = self
            .inner
            .actions
            .get(action)
            .ok_or_else(|| StoreError::UnknownAction {
                store: self.inner.id.clone(),
                action: action.to_string(),
            })?;
        wrapped(self, args)
    }

    /// Invoke an action and return its value if it completes without
    /// suspending.
    ///
    /// An asynchronous body that suspends has run up to that point, but the
    /// rest of it is cancelled, its after and error hooks never fire, and
    /// [`StoreError::ActionPending`] is returned. Use
    /// [`dispatch_async`](Store::dispatch_async) to see it through.
    pub fn dispatch(&self, action: &str, args: &[Value]) -> Result<Value> {
        match self.call(action, args)? {
            Completion::Ready(value) => Ok(value),
            Completion::Pending(_) => Err(StoreError::ActionPending {
                store: self.inner.id.clone(),
                action: action.to_string(),
            }),
        }
    }

    /// Invoke an action and await its value, whether or not it is async.
    pub fn dispatch_async(&self, action: &str, args: &[Value]) -> BoxFuture<'static, Result<Value>> {
        match self.call(action, args) {
            Ok(completion) => completion.into_future(),
            Err(error) => futures::future::ready(Err(error)).boxed(),
        }
    }

    /// Restore the initial state of an option-style store.
    pub fn reset(&self) -> Result<()> {
        let factory = self
            .inner
            .reset
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| StoreError::NotResettable {
                store: self.inner.id.clone(),
            })?;
        let initial = factory();
        self.patch_with(|store| store.inner.state.assign(&initial));
        Ok(())
    }

    pub(crate) fn set_reset(&self, factory: StateFactory) {
        *self
            .inner
            .reset
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(factory);
    }

    /// Stop the store's scope, drop its subscriptions, and remove it from its
    /// container. The next access to its id builds a new store.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.scope.stop();
        self.inner.action_listeners.clear();
        self.inner.state_listeners.clear();
        if let Some(container) = self.container() {
            container.forget(self);
        }
        debug!(store = %self.inner.id, "store disposed");
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state)
            .field("getters", &self.getter_names())
            .field("actions", &self.action_names())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
