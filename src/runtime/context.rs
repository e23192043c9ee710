use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Observer = Arc<dyn Fn() + Send + Sync>;

/// Reactive context for tracking dependencies.
///
/// Observer ids are handed out in creation order and kept in ordered sets,
/// so observers of one signal always run in the order they were created.
struct ReactiveContext {
    current_observer: Option<usize>,
    // Map from signal ID to set of observer IDs that depend on it
    dependencies: HashMap<usize, BTreeSet<usize>>,
    // Map from observer ID to set of signal IDs it depends on
    observer_deps: HashMap<usize, BTreeSet<usize>>,
    // Map from observer ID to the effect function
    observers: HashMap<usize, Observer>,
    // Map from memo ID to dirty state
    memo_dirty: HashMap<usize, bool>,
    // Effects currently executing; a re-entrant notification is dropped
    running: BTreeSet<usize>,
    batch_depth: usize,
    pending: Vec<usize>,
}

impl ReactiveContext {
    fn new() -> Self {
        Self {
            current_observer: None,
            dependencies: HashMap::new(),
            observer_deps: HashMap::new(),
            observers: HashMap::new(),
            memo_dirty: HashMap::new(),
            running: BTreeSet::new(),
            batch_depth: 0,
            pending: Vec::new(),
        }
    }

    fn clear(&mut self) {
        self.current_observer = None;
        self.dependencies.clear();
        self.observer_deps.clear();
        self.observers.clear();
        self.memo_dirty.clear();
        self.running.clear();
        self.batch_depth = 0;
        self.pending.clear();
    }

    fn forget_dependencies(&mut self, observer_id: usize) {
        if let Some(old_deps) = self.observer_deps.remove(&observer_id) {
            for signal_id in old_deps {
                if let Some(deps) = self.dependencies.get_mut(&signal_id) {
                    deps.remove(&observer_id);
                }
            }
        }
    }
}

/// Reactive runtime for managing reactive primitives.
///
/// Every thread gets its own default runtime; scoped runtimes can be pushed
/// on top of it for isolation. The runtime tracks dependencies between
/// signals, effects, and memos, and manages the reactive graph.
///
/// # Examples
///
/// Using the default runtime:
///
/// ```
/// use stockroom::Signal;
///
/// let signal = Signal::new(42);
/// assert_eq!(signal.get(), 42);
/// ```
///
/// Using scoped runtimes for isolation:
///
/// ```
/// use stockroom::runtime::ReactiveRuntime;
/// use stockroom::Signal;
///
/// ReactiveRuntime::scope(|| {
///     let signal = Signal::new(0);
///     assert_eq!(signal.get(), 0);
/// });
/// // Runtime and all its state is dropped here
/// ```
pub struct ReactiveRuntime {
    next_id: AtomicUsize,
    context: Mutex<ReactiveContext>,
}

thread_local! {
    static RUNTIME_STACK: RefCell<Vec<Arc<ReactiveRuntime>>> = const { RefCell::new(Vec::new()) };
    static DEFAULT_RUNTIME: Arc<ReactiveRuntime> = ReactiveRuntime::new();
}

struct ObserverGuard<'a> {
    runtime: &'a ReactiveRuntime,
    prev: Option<usize>,
}

impl Drop for ObserverGuard<'_> {
    fn drop(&mut self) {
        self.runtime.ctx().current_observer = self.prev;
    }
}

impl ReactiveRuntime {
    fn new() -> Arc<Self> {
        Arc::new(ReactiveRuntime {
            next_id: AtomicUsize::new(0),
            context: Mutex::new(ReactiveContext::new()),
        })
    }

    fn ctx(&self) -> MutexGuard<'_, ReactiveContext> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a function with a fresh isolated runtime.
    ///
    /// The runtime and all its state is dropped when the function returns,
    /// unless a primitive created inside still holds on to it.
    pub fn scope<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let runtime = Self::new();
        Self::with_runtime(runtime, f)
    }

    /// The runtime used on this thread when no scoped runtime is active.
    pub fn thread_default() -> Arc<Self> {
        DEFAULT_RUNTIME.with(Arc::clone)
    }

    /// Get the current reactive runtime (scoped or thread default).
    pub fn current() -> Arc<Self> {
        RUNTIME_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .cloned()
                .unwrap_or_else(Self::thread_default)
        })
    }

    /// Run a function with a specific runtime as the current context.
    pub fn with_runtime<F, R>(runtime: Arc<Self>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        RUNTIME_STACK.with(|stack| {
            stack.borrow_mut().push(runtime);
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

        RUNTIME_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        match result {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// Clear all observers, dependencies, and state from this runtime.
    pub fn clear(&self) {
        self.ctx().clear();
        self.next_id.store(0, Ordering::SeqCst);
    }

    /// Generate the next unique ID for a reactive primitive.
    pub fn next_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Track a read of a signal by the current observer.
    pub fn track_read(&self, signal_id: usize) {
        let mut ctx = self.ctx();
        if let Some(current_observer) = ctx.current_observer {
            // Add dependency: signal -> observer
            ctx.dependencies
                .entry(signal_id)
                .or_default()
                .insert(current_observer);
            // Track that this observer depends on this signal
            ctx.observer_deps
                .entry(current_observer)
                .or_default()
                .insert(signal_id);
        }
    }

    /// Notify all observers that depend on a signal.
    pub fn notify_observers(&self, signal_id: usize) {
        let observers = {
            let ctx = self.ctx();
            ctx.dependencies
                .get(&signal_id)
                .map(|obs| obs.iter().copied().collect::<Vec<_>>())
        };

        if let Some(observers) = observers {
            for observer_id in observers {
                self.mark_observer_dirty(observer_id);
            }
        }
    }

    /// Mark an observer (memo or effect) as dirty and propagate to dependents.
    fn mark_observer_dirty(&self, observer_id: usize) {
        let mut ctx = self.ctx();

        let was_dirty = ctx
            .memo_dirty
            .get_mut(&observer_id)
            .map(|dirty| std::mem::replace(dirty, true));

        if let Some(was_dirty) = was_dirty {
            if was_dirty {
                return;
            }

            let dependents = ctx
                .dependencies
                .get(&observer_id)
                .map(|deps| deps.iter().copied().collect::<Vec<_>>());
            drop(ctx);

            for dependent_id in dependents.into_iter().flatten() {
                self.mark_observer_dirty(dependent_id);
            }
            return;
        }

        if !ctx.observers.contains_key(&observer_id) {
            return;
        }
        if ctx.batch_depth > 0 {
            if !ctx.pending.contains(&observer_id) {
                ctx.pending.push(observer_id);
            }
            return;
        }
        drop(ctx);
        self.run_observer(observer_id);
    }

    /// Register an effect function under `observer_id`.
    ///
    /// The function is not run; call [`run_observer`](Self::run_observer)
    /// to run it and capture its dependencies.
    pub fn register_observer<F>(&self, observer_id: usize, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut ctx = self.ctx();
        ctx.forget_dependencies(observer_id);
        ctx.observers.insert(observer_id, Arc::new(f));
    }

    /// Run a registered effect, re-tracking its dependencies from scratch.
    pub fn run_observer(&self, observer_id: usize) {
        let effect = {
            let mut ctx = self.ctx();
            if ctx.running.contains(&observer_id) {
                return;
            }
            let Some(effect) = ctx.observers.get(&observer_id).cloned() else {
                return;
            };
            ctx.forget_dependencies(observer_id);
            ctx.running.insert(observer_id);
            effect
        };

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.with_observer(observer_id, || effect())
        }));
        self.ctx().running.remove(&observer_id);

        if let Err(e) = result {
            std::panic::resume_unwind(e);
        }
    }

    /// Drop an observer (memo or effect) and every edge it participates in.
    pub fn remove_observer(&self, observer_id: usize) {
        let mut ctx = self.ctx();
        ctx.observers.remove(&observer_id);
        ctx.memo_dirty.remove(&observer_id);
        ctx.pending.retain(|id| *id != observer_id);
        ctx.forget_dependencies(observer_id);
        ctx.dependencies.remove(&observer_id);
    }

    /// Forget what an observer read last time, ahead of a recomputation.
    pub fn clear_dependencies(&self, observer_id: usize) {
        self.ctx().forget_dependencies(observer_id);
    }

    /// Run a function with a specific observer as the current context.
    pub fn with_observer<F, R>(&self, observer_id: usize, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let prev = self.ctx().current_observer.replace(observer_id);
        let _guard = ObserverGuard { runtime: self, prev };
        f()
    }

    /// Run a function without tracking any of its reads.
    pub fn untracked<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let prev = self.ctx().current_observer.take();
        let _guard = ObserverGuard { runtime: self, prev };
        f()
    }

    /// Defer effect execution until the outermost batch returns.
    ///
    /// Each effect made dirty inside the batch runs once when it flushes,
    /// in creation order.
    pub fn batch<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.ctx().batch_depth += 1;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

        let outermost = {
            let mut ctx = self.ctx();
            ctx.batch_depth = ctx.batch_depth.saturating_sub(1);
            ctx.batch_depth == 0
        };

        match result {
            Ok(r) => {
                if outermost {
                    self.flush();
                }
                r
            }
            Err(e) => {
                if outermost {
                    self.ctx().pending.clear();
                }
                std::panic::resume_unwind(e)
            }
        }
    }

    fn flush(&self) {
        loop {
            let mut pending = std::mem::take(&mut self.ctx().pending);
            if pending.is_empty() {
                break;
            }
            pending.sort_unstable();
            for observer_id in pending {
                self.run_observer(observer_id);
            }
        }
    }

    /// Register a memo and mark it as dirty initially.
    pub fn register_memo(&self, memo_id: usize) {
        self.ctx().memo_dirty.insert(memo_id, true);
    }

    /// Check if a memo is dirty (needs recomputation).
    ///
    /// Memos that were removed from the graph always report dirty.
    pub fn is_memo_dirty(&self, memo_id: usize) -> bool {
        self.ctx().memo_dirty.get(&memo_id).copied().unwrap_or(true)
    }

    /// Whether `memo_id` is still part of the graph.
    pub fn is_memo_registered(&self, memo_id: usize) -> bool {
        self.ctx().memo_dirty.contains_key(&memo_id)
    }

    /// Number of observers currently depending on `signal_id`.
    pub fn observer_count(&self, signal_id: usize) -> usize {
        self.ctx()
            .dependencies
            .get(&signal_id)
            .map_or(0, BTreeSet::len)
    }

    /// Mark a memo as clean (after recomputation).
    pub fn mark_memo_clean(&self, memo_id: usize) {
        if let Some(dirty) = self.ctx().memo_dirty.get_mut(&memo_id) {
            *dirty = false;
        }
    }
}
