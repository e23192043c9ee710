//! Named, singleton, observable stores.
//!
//! A [`Container`] owns every store of an application. Stores are declared
//! once with [`define_store`] (option style) or [`define_setup_store`]
//! (initializer function) and obtained through the returned [`UseStore`]
//! accessor, which builds the store the first time it is used against a
//! container and hands back the same instance afterwards.

mod action;
mod config;
mod container;
mod context;
mod define;
mod error;
mod options;
mod setup;
mod state;
#[allow(clippy::module_inception)]
mod store;
mod subscriptions;

pub use action::{ActionContext, Completion, Outcome};
pub use config::{ContainerOptions, SyncErrorPolicy};
pub use container::{Container, Extensions, PluginContext};
pub use context::{
    active_container, injected_container, set_active_container, CONTAINER_GLOBAL, CONTAINER_KEY,
};
pub use define::{
    define_setup_store, define_store, try_define_store, StoreDefinition, StoreKind, UseStore,
};
pub use error::{ActionError, Result, StoreError};
pub use options::StoreOptions;
pub use setup::{SetupContext, SetupFn};
pub use state::StateMap;
pub use store::{MutationEvent, MutationKind, Store, SubscribeOptions};
pub use subscriptions::{SubscriptionList, Unsubscribe};
