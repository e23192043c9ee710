use crate::runtime::{EffectScope, ReactiveRuntime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

struct EffectHandle {
    id: usize,
    runtime: Weak<ReactiveRuntime>,
    stopped: AtomicBool,
}

impl EffectHandle {
    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.remove_observer(self.id);
        }
    }
}

impl Drop for EffectHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A side effect that runs when its dependencies change.
///
/// Effects automatically track signal reads and re-run when those signals
/// change, re-tracking on every run. The effect runs immediately on creation
/// to establish initial dependencies. An effect created while an
/// [`EffectScope`] is running is kept alive by that scope; otherwise it stops
/// when the last handle is dropped.
///
/// # Examples
///
/// ```
/// use stockroom::{Effect, Signal};
/// use std::sync::{Arc, atomic::{AtomicI32, Ordering}};
///
/// let signal = Signal::new(5);
/// let last_value = Arc::new(AtomicI32::new(0));
/// let last_value_clone = last_value.clone();
///
/// let _effect = Effect::new({
///     let signal = signal.clone();
///     move || {
///         let val = signal.get();
///         last_value_clone.store(val, Ordering::SeqCst);
///     }
/// });
///
/// assert_eq!(last_value.load(Ordering::SeqCst), 5);
///
/// signal.set(10);
/// assert_eq!(last_value.load(Ordering::SeqCst), 10);
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectHandle>,
}

impl Effect {
    pub fn new<F>(effect: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let runtime = ReactiveRuntime::current();
        let id = runtime.next_id();

        runtime.register_observer(id, effect);

        let effect = Self {
            inner: Arc::new(EffectHandle {
                id,
                runtime: Arc::downgrade(&runtime),
                stopped: AtomicBool::new(false),
            }),
        };

        if let Some(scope) = EffectScope::current() {
            scope.keep(effect.clone());
        }

        // Run immediately within the observer context to track dependencies
        runtime.run_observer(id);
        effect
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    /// Manually trigger the effect.
    pub fn run(&self) {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.run_observer(self.inner.id);
        }
    }

    /// Detach the effect from the reactive graph. Idempotent.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_active(&self) -> bool {
        !self.inner.stopped.load(Ordering::SeqCst)
    }
}
