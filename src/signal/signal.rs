use crate::runtime::ReactiveRuntime;
use crate::signal::Effect;
use std::sync::{Arc, PoisonError, RwLock};

/// A reactive signal that holds a value and notifies subscribers when changed.
///
/// A signal belongs to the runtime that was current when it was created.
#[derive(Clone)]
pub struct Signal<T> {
    value: Arc<RwLock<T>>,
    id: usize,
    runtime: Arc<ReactiveRuntime>,
}

impl<T: Clone + Send + Sync + 'static> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(initial: T) -> Self {
        let runtime = ReactiveRuntime::current();
        let id = runtime.next_id();

        Self {
            value: Arc::new(RwLock::new(initial)),
            id,
            runtime,
        }
    }

    /// Get the current value of the signal.
    pub fn get(&self) -> T {
        self.runtime.track_read(self.id);
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get the current value without registering a dependency.
    pub fn get_untracked(&self) -> T {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Set a new value for the signal.
    pub fn set(&self, new_value: T) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = new_value;
        self.runtime.notify_observers(self.id);
    }

    /// Update the value using a function.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        {
            let mut value = self.value.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut *value);
        }
        self.runtime.notify_observers(self.id);
    }

    /// Read the value with a function without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.runtime.track_read(self.id);
        let value = self.value.read().unwrap_or_else(PoisonError::into_inner);
        f(&*value)
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Watch this signal for changes.
    ///
    /// The callback runs immediately with the current value and again after
    /// every write. The watcher lives as long as the returned [`Effect`] or
    /// the scope that was current when it was created.
    pub fn watch<F>(&self, callback: F) -> Effect
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let source = self.clone();
        let runtime = Arc::clone(&self.runtime);
        Effect::new(move || {
            let value = source.get();
            runtime.untracked(|| callback(value));
        })
    }
}

impl<T: Clone + Send + Sync + PartialEq + 'static> Signal<T> {
    /// Set the value only if it differs from the current one.
    ///
    /// Returns whether observers were notified.
    pub fn set_if_changed(&self, new_value: T) -> bool {
        {
            let mut value = self.value.write().unwrap_or_else(PoisonError::into_inner);
            if *value == new_value {
                return false;
            }
            *value = new_value;
        }
        self.runtime.notify_observers(self.id);
        true
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = self.value.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &*value)
            .finish()
    }
}
