//! Action interception: before/after/error hooks around every store action.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::{trace, warn};

use super::config::SyncErrorPolicy;
use super::error::{ActionError, Result, StoreError};
use super::subscriptions::SubscriptionList;
use super::Store;

/// What an action body produced: a value now, or one later.
pub enum Outcome {
    Ready(Value),
    Pending(BoxFuture<'static, std::result::Result<Value, ActionError>>),
}

impl Outcome {
    pub fn ready(value: impl Into<Value>) -> Self {
        Outcome::Ready(value.into())
    }

    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = std::result::Result<Value, ActionError>> + Send + 'static,
    {
        Outcome::Pending(future.boxed())
    }
}

/// What calling an intercepted action returns.
///
/// An asynchronous body has already run up to its first suspension point
/// when the call returns; one that finished without suspending is `Ready`.
/// A pending completion fires the after or error hooks of its call when it
/// resolves, and dropping it cancels the rest of the body.
pub enum Completion {
    Ready(Value),
    Pending(BoxFuture<'static, Result<Value>>),
}

impl Completion {
    pub fn is_pending(&self) -> bool {
        matches!(self, Completion::Pending(_))
    }

    pub fn into_future(self) -> BoxFuture<'static, Result<Value>> {
        match self {
            Completion::Ready(value) => futures::future::ready(Ok(value)).boxed(),
            Completion::Pending(future) => future,
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Completion::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Completion::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

pub(crate) type ActionBody =
    Arc<dyn Fn(&Store, &[Value]) -> std::result::Result<Outcome, ActionError> + Send + Sync>;
pub(crate) type WrappedAction = Arc<dyn Fn(&Store, &[Value]) -> Result<Completion> + Send + Sync>;

pub(crate) type ActionListener = dyn Fn(&ActionContext) + Send + Sync;
type AfterHook = dyn Fn(&Value) + Send + Sync;
type ErrorHook = dyn Fn(&ActionError) + Send + Sync;

pub(crate) fn sync_body<F>(f: F) -> ActionBody
where
    F: Fn(&Store, &[Value]) -> std::result::Result<Value, ActionError> + Send + Sync + 'static,
{
    Arc::new(move |store, args| f(store, args).map(Outcome::Ready))
}

pub(crate) fn async_body<F, Fut>(f: F) -> ActionBody
where
    F: Fn(Store, Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, ActionError>> + Send + 'static,
{
    Arc::new(move |store, args| Ok(Outcome::pending(f(store.clone(), args.to_vec()))))
}

#[derive(Default)]
struct CallHooks {
    after: SubscriptionList<AfterHook>,
    error: SubscriptionList<ErrorHook>,
}

/// Handed to every `on_action` listener before the action body runs.
///
/// Hooks registered through [`after`](ActionContext::after) and
/// [`on_error`](ActionContext::on_error) apply to this one call only.
pub struct ActionContext {
    name: String,
    store: Store,
    args: Vec<Value>,
    hooks: Arc<CallHooks>,
}

impl ActionContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Run `hook` with the action's result once it succeeds.
    pub fn after(&self, hook: impl Fn(&Value) + Send + Sync + 'static) {
        let _ = self.hooks.after.add(Arc::new(hook), true);
    }

    /// Run `hook` with the action's error if it fails.
    pub fn on_error(&self, hook: impl Fn(&ActionError) + Send + Sync + 'static) {
        let _ = self.hooks.error.add(Arc::new(hook), true);
    }
}

fn failure(store: &str, action: &str, source: ActionError) -> StoreError {
    StoreError::Action {
        store: store.to_string(),
        action: action.to_string(),
        source,
    }
}

/// Wrap `body` so each call notifies the store's action listeners first and
/// then fires the after or error hooks they registered.
pub(crate) fn wrap_action(name: String, body: ActionBody, policy: SyncErrorPolicy) -> WrappedAction {
    Arc::new(move |store: &Store, args: &[Value]| {
        let hooks = Arc::new(CallHooks::default());
        let context = ActionContext {
            name: name.clone(),
            store: store.clone(),
            args: args.to_vec(),
            hooks: Arc::clone(&hooks),
        };
        store
            .action_listeners()
            .trigger(|listener| listener(&context));

        trace!(store = store.id(), action = %name, "action called");
        match body(store, args) {
            Ok(Outcome::Ready(value)) => {
                hooks.after.trigger(|hook| hook(&value));
                Ok(Completion::Ready(value))
            }
            Ok(Outcome::Pending(future)) => {
                let store_id = store.id().to_string();
                let name = name.clone();
                let mut running = async move {
                    match future.await {
                        Ok(value) => {
                            hooks.after.trigger(|hook| hook(&value));
                            Ok(value)
                        }
                        Err(error) => {
                            warn!(store = %store_id, action = %name, %error, "async action failed");
                            hooks.error.trigger(|hook| hook(&error));
                            Err(failure(&store_id, &name, error))
                        }
                    }
                }
                .boxed();

                // Drive the body to its first suspension point before returning.
                match (&mut running).now_or_never() {
                    Some(Ok(value)) => Ok(Completion::Ready(value)),
                    Some(Err(error)) => Err(error),
                    None => Ok(Completion::Pending(running)),
                }
            }
            Err(error) => {
                warn!(store = store.id(), action = %name, %error, "action failed");
                hooks.error.trigger(|hook| hook(&error));
                match policy {
                    SyncErrorPolicy::Propagate => Err(failure(store.id(), &name, error)),
                    SyncErrorPolicy::Swallow => Ok(Completion::Ready(Value::Null)),
                }
            }
        }
    })
}
