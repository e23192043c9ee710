//! Resolution of the active container.
//!
//! A container provided to the running [`Component`] (or its app) wins over
//! the fallback pointer set by [`set_active_container`]. The fallback is kept
//! per thread; store logic runs on a single logical thread of control.

use std::cell::RefCell;

use super::Container;
use crate::runtime::Component;

/// Key under which an installed container is provided to its app.
pub const CONTAINER_KEY: &str = "stockroom:container";

/// Global property under which an installed container is published.
pub const CONTAINER_GLOBAL: &str = "$container";

thread_local! {
    static ACTIVE_CONTAINER: RefCell<Option<Container>> = const { RefCell::new(None) };
}

/// Set the fallback container, returning the previous one.
pub fn set_active_container(container: Option<Container>) -> Option<Container> {
    ACTIVE_CONTAINER.with(|active| active.replace(container))
}

/// The container provided to the current component, if any.
pub fn injected_container() -> Option<Container> {
    Component::current().and_then(|component| component.inject(CONTAINER_KEY))
}

/// The injected container, else the fallback.
pub fn active_container() -> Option<Container> {
    injected_container().or_else(|| ACTIVE_CONTAINER.with(|active| active.borrow().clone()))
}
