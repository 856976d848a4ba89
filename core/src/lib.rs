// src/lib.rs

//! Busline: the behavior pipeline engine of a service bus.
//!
//! Every message that enters or leaves an endpoint is processed by a stage made of
//! behaviors, async middleware that wrap the rest of the chain:
//!  - Six fixed stages (receive-physical, receive-logical, handle, send-logical-batch,
//!    send-logical, send-physical), each with its own context variant.
//!  - Stages nest: a behavior of one stage drives the next stage through the pipeline
//!    handed to it with its continuation.
//!  - Contexts form a parent chain with a data bag whose reads fall back to ancestors.
//!  - Behaviors are resolved lazily, by identifier, from the builder scope visible in
//!    the context, so a message can get its own child scope.
//!  - A per-worker context stack, balanced on every exit path.

pub mod behaviors;
pub mod core;
pub mod error;
pub mod messages;
pub mod pipeline;
pub mod registry;
pub mod settings;

// --- Re-exports for the Public API ---

pub use crate::core::behavior::{Behavior, BehaviorId};
pub use crate::core::context::{
  BehaviorContext, ContextKind, ContextVariant, HandlerInvocationContext, ReceiveLogicalMessageContext,
  ReceivePhysicalMessageContext, SendLogicalMessageContext, SendLogicalMessagesContext, SendPhysicalMessageContext,
  BUILDER_KEY, INCOMING_PHYSICAL_MESSAGE_KEY,
};
pub use crate::core::context_data::ContextData;
pub use crate::core::control::ChainOutcome;
pub use crate::core::stack::ContextStack;

pub use crate::pipeline::chain::{BehaviorChain, Next};
pub use crate::pipeline::factory::{PipelineFactory, LOGICAL_MESSAGE_HANDLING_SETTING};
pub use crate::pipeline::stages::{Stage, StageDefinitions, LOGICAL_HANDLING_BEHAVIORS};

pub use crate::registry::{BehaviorRegistry, ObjectBuilder, RegistryBuilder};
pub use crate::settings::Settings;

pub use crate::messages::{
  headers, HandleMessages, LogicalMessage, MessageHandler, MessageIntent, SendOptions, TransportMessage,
};

pub use crate::error::{PipelineError, PipelineResult};

/*
    Processing an incoming message:
    1. Register a behavior for every identifier of the stage table in a `BehaviorRegistry`
       (the `behaviors` module covers the plumbing ones).
    2. Build one `PipelineFactory` per worker over the shared registry, stage definitions
       and locked `Settings`.
    3. For each message: `prepare_physical_context(msg)`, then
       `invoke_receive_physical_pipeline().await`, then always `complete_physical_context()`.
    4. Sends issued from handlers (or outside any receive) go through
       `invoke_send_pipeline(options, messages).await`.
*/
