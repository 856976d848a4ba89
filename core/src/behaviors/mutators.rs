// busline/src/behaviors/mutators.rs

//! Behaviors that let registered mutators rewrite messages as they pass through a stage.
//! Mutators are synchronous; message locks are released before the chain continues.

use crate::core::behavior::Behavior;
use crate::core::context::{
  BehaviorContext, ReceiveLogicalMessageContext, ReceivePhysicalMessageContext, SendLogicalMessageContext,
  SendPhysicalMessageContext,
};
use crate::core::context_data::ContextData;
use crate::error::PipelineResult;
use crate::messages::{LogicalMessage, SendOptions, TransportMessage};
use crate::pipeline::chain::Next;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{event, Level};

pub trait MutateIncomingTransportMessages: Send + Sync {
  fn mutate_incoming(&self, message: &mut TransportMessage) -> anyhow::Result<()>;
}

pub trait MutateIncomingMessages: Send + Sync {
  fn mutate_incoming(&self, message: &mut LogicalMessage) -> anyhow::Result<()>;
}

pub trait MutateOutgoingMessages: Send + Sync {
  fn mutate_outgoing(&self, message: &mut LogicalMessage, options: &SendOptions) -> anyhow::Result<()>;
}

pub trait MutateOutgoingTransportMessages: Send + Sync {
  fn mutate_outgoing(&self, logical_messages: &[LogicalMessage], message: &mut TransportMessage) -> anyhow::Result<()>;
}

/// `apply-incoming-transport-mutators`. Skipped when the context carries no transport message.
pub struct ApplyIncomingTransportMutatorsBehavior {
  mutators: Vec<Arc<dyn MutateIncomingTransportMessages>>,
}

impl ApplyIncomingTransportMutatorsBehavior {
  pub fn new(mutators: Vec<Arc<dyn MutateIncomingTransportMessages>>) -> Self {
    Self { mutators }
  }

  fn apply(&self, message: &ContextData<TransportMessage>) -> anyhow::Result<()> {
    let mut message = message.write();
    for mutator in &self.mutators {
      mutator.mutate_incoming(&mut message)?;
    }
    Ok(())
  }
}

#[async_trait]
impl Behavior for ApplyIncomingTransportMutatorsBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    if let Some(message) = ctx.variant::<ReceivePhysicalMessageContext>()?.message() {
      self.apply(message)?;
      event!(Level::TRACE, mutators = self.mutators.len(), "Incoming transport mutators applied.");
    }
    next.run(ctx).await
  }
}

/// `apply-incoming-message-mutators`
pub struct ApplyIncomingMessageMutatorsBehavior {
  mutators: Vec<Arc<dyn MutateIncomingMessages>>,
}

impl ApplyIncomingMessageMutatorsBehavior {
  pub fn new(mutators: Vec<Arc<dyn MutateIncomingMessages>>) -> Self {
    Self { mutators }
  }

  fn apply(&self, message: &ContextData<LogicalMessage>) -> anyhow::Result<()> {
    let mut message = message.write();
    for mutator in &self.mutators {
      mutator.mutate_incoming(&mut message)?;
    }
    Ok(())
  }
}

#[async_trait]
impl Behavior for ApplyIncomingMessageMutatorsBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    self.apply(ctx.variant::<ReceiveLogicalMessageContext>()?.message())?;
    next.run(ctx).await
  }
}

/// `mutate-outgoing-message`
pub struct MutateOutgoingMessageBehavior {
  mutators: Vec<Arc<dyn MutateOutgoingMessages>>,
}

impl MutateOutgoingMessageBehavior {
  pub fn new(mutators: Vec<Arc<dyn MutateOutgoingMessages>>) -> Self {
    Self { mutators }
  }

  fn apply(&self, send: &SendLogicalMessageContext) -> anyhow::Result<()> {
    let mut message = send.message().write();
    for mutator in &self.mutators {
      mutator.mutate_outgoing(&mut message, send.options())?;
    }
    Ok(())
  }
}

#[async_trait]
impl Behavior for MutateOutgoingMessageBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    self.apply(ctx.variant::<SendLogicalMessageContext>()?)?;
    next.run(ctx).await
  }
}

/// `mutate-outgoing-physical-message`
pub struct MutateOutgoingPhysicalMessageBehavior {
  mutators: Vec<Arc<dyn MutateOutgoingTransportMessages>>,
}

impl MutateOutgoingPhysicalMessageBehavior {
  pub fn new(mutators: Vec<Arc<dyn MutateOutgoingTransportMessages>>) -> Self {
    Self { mutators }
  }

  fn apply(&self, send: &SendPhysicalMessageContext) -> anyhow::Result<()> {
    let mut message = send.message().write();
    for mutator in &self.mutators {
      mutator.mutate_outgoing(send.logical_messages(), &mut message)?;
    }
    Ok(())
  }
}

#[async_trait]
impl Behavior for MutateOutgoingPhysicalMessageBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    self.apply(ctx.variant::<SendPhysicalMessageContext>()?)?;
    next.run(ctx).await
  }
}
