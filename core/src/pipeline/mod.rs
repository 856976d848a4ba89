// busline/src/pipeline/mod.rs

pub mod chain;
pub mod factory;
pub mod stages;

pub use chain::{BehaviorChain, Next};
pub use factory::PipelineFactory;
pub use stages::{Stage, StageDefinitions};
