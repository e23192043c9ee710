//! Ordered callback lists with removable, optionally component-bound entries.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::runtime::on_unmounted;

type Entries<T> = Mutex<Vec<(u64, Arc<T>)>>;
type Cleanup = Box<dyn FnOnce() + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An ordered list of callbacks.
///
/// Callbacks fire in insertion order. A callback that is added again while
/// already present gets a second, independent entry.
pub struct SubscriptionList<T: ?Sized> {
    entries: Arc<Entries<T>>,
    next_key: AtomicU64,
}

impl<T: ?Sized> Default for SubscriptionList<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            next_key: AtomicU64::new(0),
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> SubscriptionList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `callback` and return its remover.
    ///
    /// Unless `detached`, the remover also runs when the component that is
    /// current at the time of the call unmounts.
    pub fn add(&self, callback: Arc<T>, detached: bool) -> Unsubscribe {
        self.add_with_cleanup(callback, detached, || {})
    }

    /// Like [`add`](Self::add), running `on_cleanup` once the entry is removed.
    pub fn add_with_cleanup(
        &self,
        callback: Arc<T>,
        detached: bool,
        on_cleanup: impl FnOnce() + Send + 'static,
    ) -> Unsubscribe {
        let key = self.next_key.fetch_add(1, Ordering::SeqCst);
        lock(&self.entries).push((key, callback));

        let entries: Weak<Entries<T>> = Arc::downgrade(&self.entries);
        let cleanup: Mutex<Option<Cleanup>> = Mutex::new(Some(Box::new(on_cleanup)));
        let remove = move || {
            let Some(entries) = entries.upgrade() else {
                return;
            };
            let removed = {
                let mut entries = lock(&entries);
                match entries.iter().position(|(k, _)| *k == key) {
                    Some(idx) => {
                        entries.remove(idx);
                        true
                    }
                    None => false,
                }
            };
            if removed {
                if let Some(cleanup) = lock(&cleanup).take() {
                    cleanup();
                }
            }
        };

        let unsubscribe = Unsubscribe {
            remove: Arc::new(remove),
        };
        if !detached {
            let on_unmount = unsubscribe.clone();
            on_unmounted(move || on_unmount.unsubscribe());
        }
        unsubscribe
    }

    /// Invoke `call` on a snapshot of the current callbacks, in order.
    ///
    /// Panics raised by a callback propagate to the caller; callbacks after it
    /// are not invoked.
    pub fn trigger(&self, mut call: impl FnMut(&T)) {
        let snapshot: Vec<Arc<T>> = lock(&self.entries)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in snapshot {
            call(&*callback);
        }
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes one subscription. Calling it more than once is a no-op.
#[derive(Clone)]
#[must_use = "dropping the handle keeps the subscription registered"]
pub struct Unsubscribe {
    remove: Arc<dyn Fn() + Send + Sync>,
}

impl Unsubscribe {
    pub fn unsubscribe(&self) {
        (self.remove)();
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Component;
    use std::sync::atomic::AtomicUsize;

    type Listener = dyn Fn(&mut Vec<&'static str>) + Send + Sync;

    fn listener(tag: &'static str) -> Arc<Listener> {
        Arc::new(move |log: &mut Vec<&'static str>| log.push(tag))
    }

    #[test]
    fn triggers_in_insertion_order() {
        let list = SubscriptionList::<Listener>::new();
        let _a = list.add(listener("a"), true);
        let _b = list.add(listener("b"), true);
        let _c = list.add(listener("c"), true);

        let mut log = Vec::new();
        list.trigger(|cb| cb(&mut log));
        assert_eq!(log, vec!["a", "b", "c"]);
    }

    #[test]
    fn remover_is_idempotent_and_runs_cleanup_once() {
        let list = SubscriptionList::<Listener>::new();
        let cleanups = Arc::new(AtomicUsize::new(0));
        let counter = cleanups.clone();
        let remove = list.add_with_cleanup(listener("a"), true, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let _keep = list.add(listener("b"), true);

        remove.unsubscribe();
        remove.unsubscribe();
        assert_eq!(list.len(), 1);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removing_one_duplicate_keeps_the_other() {
        let list = SubscriptionList::<Listener>::new();
        let shared = listener("x");
        let first = list.add(shared.clone(), true);
        let _second = list.add(shared, true);

        first.unsubscribe();
        let mut log = Vec::new();
        list.trigger(|cb| cb(&mut log));
        assert_eq!(log, vec!["x"]);
    }

    #[test]
    fn component_unmount_removes_attached_entries() {
        let list = SubscriptionList::<Listener>::new();
        let component = Component::new();
        component.run(|| {
            let _attached = list.add(listener("attached"), false);
            let _detached = list.add(listener("detached"), true);
        });
        assert_eq!(list.len(), 2);

        component.unmount();
        let mut log = Vec::new();
        list.trigger(|cb| cb(&mut log));
        assert_eq!(log, vec!["detached"]);
    }
}
