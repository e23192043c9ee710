//! Store definitions and the accessors that build stores on first use.

use std::sync::Arc;

use tracing::debug;

use super::container::Container;
use super::context::{active_container, injected_container, set_active_container};
use super::error::{ActionError, Result, StoreError};
use super::options::{build_options_store, StoreOptions};
use super::setup::{build_setup_store, SetupContext, SetupFn};
use super::Store;

/// How a store is built.
#[derive(Clone)]
pub enum StoreKind {
    Setup(SetupFn),
    Options(StoreOptions),
}

/// A store id together with the recipe for building it.
#[derive(Clone)]
pub struct StoreDefinition {
    id: String,
    kind: StoreKind,
}

impl StoreDefinition {
    pub fn options(id: impl Into<String>, options: StoreOptions) -> Self {
        Self {
            id: id.into(),
            kind: StoreKind::Options(options),
        }
    }

    pub fn setup<F>(id: impl Into<String>, setup: F) -> Self
    where
        F: Fn(&mut SetupContext) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            kind: StoreKind::Setup(Arc::new(setup)),
        }
    }

    /// A definition from a descriptor that carries its own id.
    pub fn from_options(options: StoreOptions) -> Result<Self> {
        let id = options.id().ok_or(StoreError::MissingId)?.to_string();
        Ok(Self::options(id, options))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &StoreKind {
        &self.kind
    }

    pub fn is_setup(&self) -> bool {
        matches!(self.kind, StoreKind::Setup(_))
    }
}

/// Define an option-style store under `id`.
pub fn define_store(id: impl Into<String>, options: StoreOptions) -> UseStore {
    UseStore::new(StoreDefinition::options(id, options))
}

/// Define an option-style store from a descriptor carrying its own id.
pub fn try_define_store(options: StoreOptions) -> Result<UseStore> {
    StoreDefinition::from_options(options).map(UseStore::new)
}

/// Define a setup-style store under `id`.
pub fn define_setup_store<F>(id: impl Into<String>, setup: F) -> UseStore
where
    F: Fn(&mut SetupContext) -> Result<(), ActionError> + Send + Sync + 'static,
{
    UseStore::new(StoreDefinition::setup(id, setup))
}

/// Accessor for one store definition.
///
/// Holds no store itself: every container builds its own instance the first
/// time the accessor is used against it and returns that same instance until
/// it is disposed.
#[derive(Clone)]
pub struct UseStore {
    definition: Arc<StoreDefinition>,
}

impl UseStore {
    pub fn new(definition: StoreDefinition) -> Self {
        Self {
            definition: Arc::new(definition),
        }
    }

    pub fn id(&self) -> &str {
        self.definition.id()
    }

    pub fn definition(&self) -> &StoreDefinition {
        &self.definition
    }

    /// Get the store from the active container.
    ///
    /// A container injected into the current component is preferred and
    /// becomes the fallback for later calls made outside any component.
    pub fn use_store(&self) -> Result<Store> {
        if let Some(injected) = injected_container() {
            set_active_container(Some(injected));
        }
        let container = active_container().ok_or(StoreError::MissingContainer)?;
        self.use_store_in(&container)
    }

    /// Get the store from `container`, building it on first use.
    pub fn use_store_in(&self, container: &Container) -> Result<Store> {
        if let Some(store) = container.store(self.id()) {
            return Ok(store);
        }

        let id = self.id();
        debug!(store = id, setup = self.definition.is_setup(), "building store");
        match &self.definition.kind {
            StoreKind::Setup(setup) => build_setup_store(id, |ctx| setup(ctx), container),
            StoreKind::Options(options) => build_options_store(id, options, container),
        }
    }
}

impl std::fmt::Debug for UseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UseStore")
            .field("id", &self.definition.id)
            .field("setup", &self.definition.is_setup())
            .finish()
    }
}
