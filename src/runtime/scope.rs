use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::ReactiveRuntime;
use crate::signal::Effect;

type Cleanup = Box<dyn FnOnce() + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ScopeInner {
    active: AtomicBool,
    parent: Option<Weak<ScopeInner>>,
    memos: Mutex<Vec<(Weak<ReactiveRuntime>, usize)>>,
    effects: Mutex<Vec<Effect>>,
    children: Mutex<Vec<EffectScope>>,
    cleanups: Mutex<Vec<Cleanup>>,
}

/// A lifecycle scope that owns the memos and effects created while it runs.
///
/// Stopping a scope stops every child scope, stops its effects, and detaches
/// its memos from the reactive graph. A scope created while another scope is
/// current becomes its child unless it is detached.
///
/// # Examples
///
/// ```
/// use stockroom::runtime::EffectScope;
/// use stockroom::{Effect, Signal};
/// use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
///
/// let signal = Signal::new(0);
/// let runs = Arc::new(AtomicUsize::new(0));
/// let scope = EffectScope::new(true);
///
/// scope.run(|| {
///     let signal = signal.clone();
///     let runs = runs.clone();
///     Effect::new(move || {
///         signal.get();
///         runs.fetch_add(1, Ordering::SeqCst);
///     });
/// });
///
/// signal.set(1);
/// assert_eq!(runs.load(Ordering::SeqCst), 2);
///
/// scope.stop();
/// signal.set(2);
/// assert_eq!(runs.load(Ordering::SeqCst), 2);
/// ```
#[derive(Clone)]
pub struct EffectScope {
    inner: Arc<ScopeInner>,
}

thread_local! {
    static SCOPE_STACK: RefCell<Vec<EffectScope>> = const { RefCell::new(Vec::new()) };
}

impl EffectScope {
    /// Create a scope, attaching it to the current scope unless `detached`.
    pub fn new(detached: bool) -> Self {
        let parent = if detached {
            None
        } else {
            Self::current().filter(EffectScope::is_active)
        };
        let scope = Self {
            inner: Arc::new(ScopeInner {
                active: AtomicBool::new(true),
                parent: parent.as_ref().map(|parent| Arc::downgrade(&parent.inner)),
                memos: Mutex::new(Vec::new()),
                effects: Mutex::new(Vec::new()),
                children: Mutex::new(Vec::new()),
                cleanups: Mutex::new(Vec::new()),
            }),
        };

        if let Some(parent) = parent {
            lock(&parent.inner.children).push(scope.clone());
        }
        scope
    }

    /// The innermost scope currently running on this thread.
    pub fn current() -> Option<Self> {
        SCOPE_STACK.with(|stack| stack.borrow().last().cloned())
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Run `f` with this scope current. Returns `None` once stopped.
    pub fn run<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce() -> R,
    {
        if !self.is_active() {
            return None;
        }

        SCOPE_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
        SCOPE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        match result {
            Ok(r) => Some(r),
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// Stop this scope and everything it owns. Idempotent.
    pub fn stop(&self) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }

        // A parent that is stopping has already taken its children.
        if let Some(parent) = self.inner.parent.as_ref().and_then(Weak::upgrade) {
            lock(&parent.children).retain(|child| !Arc::ptr_eq(&child.inner, &self.inner));
        }

        let children = std::mem::take(&mut *lock(&self.inner.children));
        for child in children {
            child.stop();
        }

        let effects = std::mem::take(&mut *lock(&self.inner.effects));
        for effect in effects {
            effect.stop();
        }

        let memos = std::mem::take(&mut *lock(&self.inner.memos));
        for (runtime, memo_id) in memos {
            if let Some(runtime) = runtime.upgrade() {
                runtime.remove_observer(memo_id);
            }
        }

        let cleanups = std::mem::take(&mut *lock(&self.inner.cleanups));
        for cleanup in cleanups {
            cleanup();
        }
    }

    /// Keep `effect` alive until the scope stops or it is released.
    pub fn keep(&self, effect: Effect) {
        if self.is_active() {
            lock(&self.inner.effects).push(effect);
        } else {
            effect.stop();
        }
    }

    /// Stop and forget an effect previously kept by this scope.
    pub fn release(&self, effect_id: usize) {
        let released = {
            let mut effects = lock(&self.inner.effects);
            effects
                .iter()
                .position(|effect| effect.id() == effect_id)
                .map(|idx| effects.remove(idx))
        };
        if let Some(effect) = released {
            effect.stop();
        }
    }

    /// Run `f` when the scope stops.
    pub fn on_stop(&self, f: impl FnOnce() + Send + 'static) {
        if self.is_active() {
            lock(&self.inner.cleanups).push(Box::new(f));
        } else {
            f();
        }
    }

    pub(crate) fn track_memo(&self, runtime: &Arc<ReactiveRuntime>, memo_id: usize) {
        lock(&self.inner.memos).push((Arc::downgrade(runtime), memo_id));
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
