use crate::runtime::{EffectScope, ReactiveRuntime};
use std::sync::{Arc, PoisonError, RwLock};

/// A memoized computed value that automatically tracks dependencies.
///
/// Memos are lazy: they recompute on read, and only when a dependency changed
/// since the last computation.
#[derive(Clone)]
pub struct Memo<T> {
    compute: Arc<dyn Fn() -> T + Send + Sync>,
    cached: Arc<RwLock<Option<T>>>,
    id: usize,
    runtime: Arc<ReactiveRuntime>,
}

impl<T: Clone + 'static> Memo<T> {
    /// Create a new memo with the given computation function.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let runtime = ReactiveRuntime::current();
        let id = runtime.next_id();

        // Register this as a memo with the runtime
        runtime.register_memo(id);
        if let Some(scope) = EffectScope::current() {
            scope.track_memo(&runtime, id);
        }

        Self {
            compute: Arc::new(compute),
            cached: Arc::new(RwLock::new(None)),
            id,
            runtime,
        }
    }

    /// Get the current value, recomputing if necessary.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Read the memoized value with a function without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        // Removed from the graph (its scope stopped): compute without tracking.
        if !self.runtime.is_memo_registered(self.id) {
            let value = self.runtime.untracked(|| (self.compute)());
            return f(&value);
        }

        self.runtime.track_read(self.id);

        if self.runtime.is_memo_dirty(self.id) {
            self.runtime.clear_dependencies(self.id);
            let value = self.runtime.with_observer(self.id, || (self.compute)());
            self.runtime.mark_memo_clean(self.id);
            let result = f(&value);
            *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
            return result;
        }

        let cached = self.cached.read().unwrap_or_else(PoisonError::into_inner);
        match cached.as_ref() {
            Some(value) => f(value),
            None => {
                drop(cached);
                let value = self.runtime.untracked(|| (self.compute)());
                let result = f(&value);
                *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
                result
            }
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Signal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn memo_basic() {
        let count = Signal::new(5);
        let doubled = Memo::new({
            let count = count.clone();
            move || count.get() * 2
        });

        assert_eq!(doubled.get(), 10);

        count.set(10);
        assert_eq!(doubled.get(), 20);
    }

    #[test]
    fn memo_recomputes_once_per_change() {
        let count = Signal::new(1);
        let computations = Arc::new(AtomicUsize::new(0));
        let squared = Memo::new({
            let (count, computations) = (count.clone(), computations.clone());
            move || {
                computations.fetch_add(1, Ordering::SeqCst);
                count.get() * count.get()
            }
        });

        for _ in 0..3 {
            assert_eq!(squared.get(), 1);
        }
        assert_eq!(computations.load(Ordering::SeqCst), 1);

        count.set(3);
        count.set(4);
        for _ in 0..3 {
            assert_eq!(squared.get(), 16);
        }
        assert_eq!(computations.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn chained_memos_propagate() {
        let input = Signal::new(1);
        let doubled = Memo::new({
            let input = input.clone();
            move || input.get() * 2
        });
        let quadrupled = Memo::new({
            let doubled = doubled.clone();
            move || doubled.get() * 2
        });

        assert_eq!(quadrupled.get(), 4);
        input.set(5);
        assert_eq!(quadrupled.get(), 20);
    }

    #[test]
    fn removed_memo_computes_without_tracking() {
        ReactiveRuntime::scope(|| {
            let runtime = ReactiveRuntime::current();
            let count = Signal::new(2);
            let doubled = Memo::new({
                let count = count.clone();
                move || count.get() * 2
            });
            assert_eq!(doubled.get(), 4);
            assert_eq!(runtime.observer_count(count.id()), 1);

            runtime.remove_observer(doubled.id());
            count.set(5);
            assert_eq!(doubled.get(), 10);
            assert_eq!(runtime.observer_count(count.id()), 0);
        });
    }
}
