// busline/src/behaviors/receive.rs

//! Behaviors that fan an incoming physical message out into logical messages and handlers.

use crate::core::behavior::Behavior;
use crate::core::context::{
  BehaviorContext, HandlerInvocationContext, ReceiveLogicalMessageContext, ReceivePhysicalMessageContext,
};
use crate::error::{PipelineError, PipelineResult};
use crate::messages::{LogicalMessage, MessageHandler, TransportMessage};
use crate::pipeline::chain::Next;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{event, Level};

/// Header marking transport-level control messages, which carry no logical messages.
pub const CONTROL_MESSAGE_HEADER: &str = "Bus.ControlMessage";

/// Turns a physical payload into logical messages (deserialization lives behind this).
pub trait ExtractLogicalMessages: Send + Sync {
  fn extract(&self, message: &TransportMessage) -> anyhow::Result<Vec<LogicalMessage>>;
}

/// Finds the handlers for a logical message.
pub trait HandlerRegistry: Send + Sync {
  fn handlers_for(&self, message: &LogicalMessage) -> Vec<MessageHandler>;
}

/// `extract-logical-messages`: records the logical messages on the physical context and
/// runs receive-logical once per message, in order.
///
/// The first failing message aborts the rest; per-message isolation is left to behaviors
/// inside the logical stage.
pub struct ExtractLogicalMessagesBehavior {
  extractor: Arc<dyn ExtractLogicalMessages>,
}

impl ExtractLogicalMessagesBehavior {
  pub fn new(extractor: Arc<dyn ExtractLogicalMessages>) -> Self {
    Self { extractor }
  }

  fn extract(&self, physical: &ReceivePhysicalMessageContext) -> anyhow::Result<Vec<LogicalMessage>> {
    let Some(message) = physical.message() else {
      return Ok(Vec::new());
    };
    let message = message.read();
    if message.headers.contains_key(CONTROL_MESSAGE_HEADER) {
      event!(Level::DEBUG, message_id = %message.id, "Control message, no logical messages to extract.");
      return Ok(Vec::new());
    }
    self.extractor.extract(&message)
  }
}

#[async_trait]
impl Behavior for ExtractLogicalMessagesBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    let physical = ctx.variant::<ReceivePhysicalMessageContext>()?;
    let messages = self.extract(physical)?;
    event!(Level::DEBUG, count = messages.len(), "Logical messages extracted.");
    physical.set_logical_messages(messages.clone());

    for message in messages {
      next.pipeline().invoke_logical_pipeline_with(ctx, message).await?;
    }
    next.run(ctx).await
  }
}

/// `load-handlers`: runs the handle stage once per matched handler.
///
/// A message without handlers is an error. Dispatch to further handlers stops once a
/// handler context is marked with `abort_dispatch`.
pub struct LoadHandlersBehavior {
  registry: Arc<dyn HandlerRegistry>,
}

impl LoadHandlersBehavior {
  pub fn new(registry: Arc<dyn HandlerRegistry>) -> Self {
    Self { registry }
  }
}

#[async_trait]
impl Behavior for LoadHandlersBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    let message = ctx.variant::<ReceiveLogicalMessageContext>()?.message().snapshot();
    let handlers = self.registry.handlers_for(&message);
    if handlers.is_empty() {
      event!(Level::ERROR, message_type = %message.message_type, "No handlers found.");
      return Err(PipelineError::NoHandlers {
        message_type: message.message_type,
      });
    }

    for handler in handlers {
      let handler_ctx = next.pipeline().invoke_handler_pipeline(ctx, handler).await?;
      if handler_ctx.variant::<HandlerInvocationContext>()?.is_dispatch_aborted() {
        event!(Level::DEBUG, message_type = %message.message_type, "Dispatch to remaining handlers aborted.");
        break;
      }
    }
    next.run(ctx).await
  }
}

/// `invoke-handler`: hands the logical message to the context's handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct InvokeHandlerBehavior;

#[async_trait]
impl Behavior for InvokeHandlerBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    let invocation = ctx.variant::<HandlerInvocationContext>()?;
    let message = invocation.message().snapshot();
    event!(Level::TRACE, handler = %invocation.handler().name, message_type = %message.message_type, "Invoking handler.");
    invocation.handler().instance.handle(&message).await?;
    next.run(ctx).await
  }
}
