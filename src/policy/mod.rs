//! Initialization policy: when each class's initializer is allowed to run

pub mod kind;
pub mod store;

pub use kind::InitKind;
pub use store::{PolicyDecision, PolicyDirective, PolicyStore};
