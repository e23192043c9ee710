use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

type Provided = Arc<dyn Any + Send + Sync>;
type UnmountHook = Box<dyn FnOnce() + Send>;

fn read<T: Clone + 'static>(map: &RwLock<HashMap<String, Provided>>, key: &str) -> Option<T> {
    map.read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(key)
        .and_then(|value| value.downcast_ref::<T>().cloned())
}

fn write<T: Any + Send + Sync>(map: &RwLock<HashMap<String, Provided>>, key: &str, value: T) {
    map.write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key.to_string(), Arc::new(value));
}

struct AppInner {
    name: String,
    provides: RwLock<HashMap<String, Provided>>,
    globals: RwLock<HashMap<String, Provided>>,
}

/// Host application handle.
///
/// Offers the two integration points a store container needs from its host:
/// an app-wide dependency-provision table that every [`Component`] of the app
/// can inject from, and a table of global properties.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

impl App {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(AppInner {
                name: name.into(),
                provides: RwLock::new(HashMap::new()),
                globals: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Make `value` injectable under `key` from every component of this app.
    pub fn provide<T: Any + Send + Sync>(&self, key: &str, value: T) {
        write(&self.inner.provides, key, value);
    }

    pub fn inject<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        read(&self.inner.provides, key)
    }

    pub fn set_global<T: Any + Send + Sync>(&self, key: &str, value: T) {
        write(&self.inner.globals, key, value);
    }

    pub fn global<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        read(&self.inner.globals, key)
    }

    /// Create the root component of this app.
    pub fn mount(&self) -> Component {
        Component::build(Some(self.clone()), None)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App").field("name", &self.inner.name).finish()
    }
}

struct ComponentInner {
    app: Option<App>,
    parent: Option<Component>,
    provides: RwLock<HashMap<String, Provided>>,
    unmount_hooks: Mutex<Vec<UnmountHook>>,
    mounted: AtomicBool,
}

/// An ambient execution context with a lifetime.
///
/// While [`run`](Component::run) executes, the component is current on this
/// thread: code can inject values provided by it, its ancestors, or its app,
/// and can register hooks that fire when the component unmounts.
#[derive(Clone)]
pub struct Component {
    inner: Arc<ComponentInner>,
}

thread_local! {
    static COMPONENT_STACK: RefCell<Vec<Component>> = const { RefCell::new(Vec::new()) };
}

impl Default for Component {
    fn default() -> Self {
        Self::new()
    }
}

impl Component {
    /// A free-standing component that belongs to no app.
    pub fn new() -> Self {
        Self::build(None, None)
    }

    fn build(app: Option<App>, parent: Option<Component>) -> Self {
        Self {
            inner: Arc::new(ComponentInner {
                app,
                parent,
                provides: RwLock::new(HashMap::new()),
                unmount_hooks: Mutex::new(Vec::new()),
                mounted: AtomicBool::new(true),
            }),
        }
    }

    /// Create a child component that inherits this one's provisions.
    pub fn child(&self) -> Self {
        Self::build(self.inner.app.clone(), Some(self.clone()))
    }

    pub fn app(&self) -> Option<&App> {
        self.inner.app.as_ref()
    }

    /// The component currently running on this thread.
    pub fn current() -> Option<Self> {
        COMPONENT_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Run `f` with this component as the ambient context.
    pub fn run<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        COMPONENT_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
        COMPONENT_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        match result {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    pub fn provide<T: Any + Send + Sync>(&self, key: &str, value: T) {
        write(&self.inner.provides, key, value);
    }

    /// Look `key` up on this component, then its ancestors, then its app.
    pub fn inject<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        if let Some(value) = read(&self.inner.provides, key) {
            return Some(value);
        }
        match &self.inner.parent {
            Some(parent) => parent.inject(key),
            None => self.inner.app.as_ref().and_then(|app| app.inject(key)),
        }
    }

    pub fn on_unmounted(&self, hook: impl FnOnce() + Send + 'static) {
        if self.is_mounted() {
            self.inner
                .unmount_hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Box::new(hook));
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::SeqCst)
    }

    /// Tear the component down, running unmount hooks in registration order.
    pub fn unmount(&self) {
        if !self.inner.mounted.swap(false, Ordering::SeqCst) {
            return;
        }
        let hooks = std::mem::take(
            &mut *self
                .inner
                .unmount_hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for hook in hooks {
            hook();
        }
    }
}

/// Register `hook` on the current component.
///
/// Returns `false` when no component is running, in which case the hook is
/// dropped without being called.
pub fn on_unmounted(hook: impl FnOnce() + Send + 'static) -> bool {
    match Component::current() {
        Some(component) => {
            component.on_unmounted(hook);
            true
        }
        None => false,
    }
}
