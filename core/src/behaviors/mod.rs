// busline/src/behaviors/mod.rs

//! Plumbing behaviors that ship with the crate.
//!
//! None of them carry business logic; each one drives the stage it belongs to or hands
//! the message to a collaborator trait the host implements. Business behaviors (audit,
//! sagas, validators, ...) are registered by the host under their stage identifiers.

pub mod child_scope;
pub mod logging;
pub mod mutators;
pub mod receive;
pub mod send;
pub mod unit_of_work;

pub use child_scope::ChildScopeBehavior;
pub use logging::MessageHandlingLoggingBehavior;
pub use mutators::{
  ApplyIncomingMessageMutatorsBehavior, ApplyIncomingTransportMutatorsBehavior, MutateIncomingMessages,
  MutateIncomingTransportMessages, MutateOutgoingMessageBehavior, MutateOutgoingMessages,
  MutateOutgoingPhysicalMessageBehavior, MutateOutgoingTransportMessages,
};
pub use receive::{
  ExtractLogicalMessages, ExtractLogicalMessagesBehavior, HandlerRegistry, InvokeHandlerBehavior,
  LoadHandlersBehavior, CONTROL_MESSAGE_HEADER,
};
pub use send::{
  CreatePhysicalMessageBehavior, DispatchMessageToTransportBehavior, DispatchMessages, MessageSerializer,
  MultiMessageBehavior, SerializeMessagesBehavior,
};
pub use unit_of_work::{ManageUnitsOfWork, UnitOfWorkBehavior};
