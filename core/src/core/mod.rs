pub mod behavior;
pub mod context;
pub mod context_data;
pub mod control;
pub mod stack;

// Re-export key types for easier access from other modules
pub use behavior::{Behavior, BehaviorId};
pub use context::{BehaviorContext, ContextKind, ContextVariant};
pub use context_data::ContextData;
pub use control::ChainOutcome;
pub use stack::ContextStack;
