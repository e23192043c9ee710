//! Fine-grained reactive primitives.
//!
//! This module provides the core building blocks the store engine runs on:
//! - Signals: Reactive state containers
//! - Memos: Cached computed values
//! - Effects: Side effects that react to changes

mod effect;
mod memo;
mod signal;

pub use effect::Effect;
pub use memo::Memo;
pub use signal::Signal;
