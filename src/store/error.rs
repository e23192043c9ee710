//! Typed errors for store construction and access.

use thiserror::Error;

/// Failure raised by a user-supplied action body or store initializer.
pub type ActionError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Errors surfaced by the store engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No container was passed, injected, or set active
    #[error("no active store container: install one or pass it explicitly")]
    MissingContainer,

    /// A single-descriptor definition carried no id
    #[error("store definition has no id")]
    MissingId,

    #[error("store `{store}` has no action `{action}`")]
    UnknownAction { store: String, action: String },

    /// Getters are derived and cannot be assigned
    #[error("`{name}` on store `{store}` is a getter and cannot be assigned")]
    ReadOnly { store: String, name: String },

    /// Only option-style stores know their initial state
    #[error("store `{store}` was built from a setup function and has no reset")]
    NotResettable { store: String },

    #[error("store `{store}` has been disposed")]
    Disposed { store: String },

    /// A synchronous dispatch hit an action that returned a pending result
    #[error("action `{action}` on store `{store}` is asynchronous")]
    ActionPending { store: String, action: String },

    #[error("initializer for store `{store}` failed: {source}")]
    Setup {
        store: String,
        #[source]
        source: ActionError,
    },

    #[error("action `{action}` on store `{store}` failed: {source}")]
    Action {
        store: String,
        action: String,
        #[source]
        source: ActionError,
    },
}

impl StoreError {
    /// The error raised by the user's action or initializer body, if any.
    pub fn user_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            StoreError::Setup { source, .. } | StoreError::Action { source, .. } => {
                Some(source.as_ref())
            }
            _ => None,
        }
    }
}
