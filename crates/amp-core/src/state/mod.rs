//! Remote-core lifecycle state machine.

/// Lifecycle states and their legal transitions.
pub mod lifecycle;

pub use lifecycle::LifecycleState;
