//! # Stockroom
//!
//! Named, singleton, observable stores built on fine-grained reactive state.
//!
//! Stockroom has two layers:
//!
//! ## Signals (Low-level primitives)
//!
//! A small reactive graph the stores run on:
//! - `Signal<T>` - Reactive values that notify dependents when changed
//! - `Memo<T>` - Computed values that automatically track dependencies
//! - `Effect` - Side effects that run when dependencies change
//! - `EffectScope` - Lifecycle scopes that stop everything created inside
//!
//! ## Stores (High-level state management)
//!
//! - `Container` - Owns all stores, their state, and plugins for one app
//! - `define_store` / `define_setup_store` - Declare a store once, get it
//!   lazily per container through a `UseStore` accessor
//! - `Store` - State fields, cached getters, intercepted actions, plus
//!   `patch`, `subscribe`, `on_action`, `reset`, and `dispose`

pub mod runtime;
pub mod signal;
pub mod store;

// Re-export main types for convenience
pub use runtime::{App, Component, EffectScope};
pub use signal::{Effect, Memo, Signal};
pub use store::{
    define_setup_store, define_store, try_define_store, ActionContext, ActionError, Completion,
    Container, ContainerOptions, Extensions, MutationEvent, MutationKind, Outcome, PluginContext,
    Result, SetupContext, Store, StoreError, StoreOptions, SubscribeOptions, SyncErrorPolicy,
    Unsubscribe, UseStore,
};
