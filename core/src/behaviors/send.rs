// busline/src/behaviors/send.rs

//! Behaviors that expand an outgoing batch into physical messages and hand them to the transport.

use crate::core::behavior::Behavior;
use crate::core::context::{BehaviorContext, SendLogicalMessagesContext, SendPhysicalMessageContext};
use crate::error::PipelineResult;
use crate::messages::{headers, LogicalMessage, SendOptions, TransportMessage};
use crate::pipeline::chain::Next;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{event, Level};
use uuid::Uuid;

/// Writes logical messages into a transport body.
pub trait MessageSerializer: Send + Sync {
  fn content_type(&self) -> &str;

  fn serialize(&self, messages: &[LogicalMessage]) -> anyhow::Result<Vec<u8>>;
}

/// The outbound side of the transport.
#[async_trait]
pub trait DispatchMessages: Send + Sync {
  async fn dispatch(&self, message: TransportMessage, options: &SendOptions) -> anyhow::Result<()>;
}

/// `multi-message-expand`: runs send-logical once per batch message.
///
/// Messages whose send-logical chain completes are recorded as outgoing on the batch
/// context; a short-circuited message is not sent.
#[derive(Debug, Default, Clone, Copy)]
pub struct MultiMessageBehavior;

#[async_trait]
impl Behavior for MultiMessageBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    let batch = ctx.variant::<SendLogicalMessagesContext>()?;
    for message in batch.messages() {
      let logical_ctx = next
        .pipeline()
        .invoke_send_logical_pipeline(ctx, batch.options().clone(), message.clone())
        .await?;
      if logical_ctx.outcome().is_some_and(|outcome| outcome.is_completed()) {
        batch.push_outgoing(message.clone());
      } else {
        event!(Level::DEBUG, message_type = %message.read().message_type, "Send of message short-circuited.");
      }
    }
    next.run(ctx).await
  }
}

/// `create-physical-message`: builds one transport message per outgoing logical message
/// and runs send-physical for each.
#[derive(Debug, Default, Clone, Copy)]
pub struct CreatePhysicalMessageBehavior;

impl CreatePhysicalMessageBehavior {
  fn build(options: &SendOptions, logical: &LogicalMessage) -> TransportMessage {
    let id = Uuid::new_v4().to_string();
    let mut message = TransportMessage {
      id: id.clone(),
      headers: logical.headers.clone(),
      body: Vec::new(),
      intent: options.intent,
      correlation_id: options.correlation_id.clone(),
      reply_to_address: options.reply_to_address.clone(),
    };
    message.headers.insert(headers::MESSAGE_ID.to_string(), id);
    message
      .headers
      .insert(headers::ENCLOSED_MESSAGE_TYPES.to_string(), logical.message_type.clone());
    message
      .headers
      .insert(headers::MESSAGE_INTENT.to_string(), options.intent.to_string());
    if let Some(correlation_id) = &options.correlation_id {
      message
        .headers
        .insert(headers::CORRELATION_ID.to_string(), correlation_id.clone());
    }
    if let Some(reply_to) = &options.reply_to_address {
      message.headers.insert(headers::REPLY_TO_ADDRESS.to_string(), reply_to.clone());
    }
    message
  }
}

#[async_trait]
impl Behavior for CreatePhysicalMessageBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    let batch = ctx.variant::<SendLogicalMessagesContext>()?;
    let options = batch.options().clone();
    for message in batch.outgoing() {
      let logical = message.snapshot();
      let physical = Self::build(&options, &logical);
      next
        .pipeline()
        .invoke_send_physical_pipeline_for(options.clone(), physical, vec![logical])
        .await?;
    }
    next.run(ctx).await
  }
}

/// `serialize`: fills the transport body from the logical messages it was built from.
/// Raw physical sends (no logical messages) keep their body.
pub struct SerializeMessagesBehavior {
  serializer: Arc<dyn MessageSerializer>,
}

impl SerializeMessagesBehavior {
  pub fn new(serializer: Arc<dyn MessageSerializer>) -> Self {
    Self { serializer }
  }

  fn serialize(&self, send: &SendPhysicalMessageContext) -> anyhow::Result<()> {
    if send.logical_messages().is_empty() {
      return Ok(());
    }
    let body = self.serializer.serialize(send.logical_messages())?;
    let mut message = send.message().write();
    message.body = body;
    message
      .headers
      .insert(headers::CONTENT_TYPE.to_string(), self.serializer.content_type().to_string());
    Ok(())
  }
}

#[async_trait]
impl Behavior for SerializeMessagesBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    self.serialize(ctx.variant::<SendPhysicalMessageContext>()?)?;
    next.run(ctx).await
  }
}

/// `dispatch-to-transport`
pub struct DispatchMessageToTransportBehavior {
  transport: Arc<dyn DispatchMessages>,
}

impl DispatchMessageToTransportBehavior {
  pub fn new(transport: Arc<dyn DispatchMessages>) -> Self {
    Self { transport }
  }
}

#[async_trait]
impl Behavior for DispatchMessageToTransportBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    let send = ctx.variant::<SendPhysicalMessageContext>()?;
    let message = send.message().snapshot();
    event!(
      Level::DEBUG,
      message_id = %message.id,
      destination = send.options().destination.as_deref().unwrap_or("<none>"),
      intent = %send.options().intent,
      "Dispatching message to transport."
    );
    self.transport.dispatch(message, send.options()).await?;
    next.run(ctx).await
  }
}
