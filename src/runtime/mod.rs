//! Runtime support for reactive primitives.
//!
//! This module provides the infrastructure for dependency tracking,
//! reactive graph management, lifecycle scopes, and the ambient execution
//! contexts (`App`, `Component`) that stores resolve their container from.

mod component;
mod context;
mod scope;

pub use component::{on_unmounted, App, Component};
pub use context::ReactiveRuntime;
pub use scope::EffectScope;
