// busline/src/behaviors/logging.rs

use crate::core::behavior::Behavior;
use crate::core::context::{BehaviorContext, ReceivePhysicalMessageContext};
use crate::error::PipelineResult;
use crate::pipeline::chain::Next;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{event, span, Instrument, Level};

/// `logging`: wraps the handling of an incoming message in a span and logs how it ended.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageHandlingLoggingBehavior;

#[async_trait]
impl Behavior for MessageHandlingLoggingBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    let physical = ctx.variant::<ReceivePhysicalMessageContext>()?;
    let message_id = physical
      .message()
      .map(|message| message.read().id.clone())
      .unwrap_or_default();

    let handling_span = span!(Level::INFO, "handling_message", message_id = %message_id);
    async move {
      event!(Level::DEBUG, "Received message.");
      match next.run(ctx).await {
        Ok(()) => {
          event!(Level::DEBUG, "Finished handling message.");
          Ok(())
        }
        Err(e) => {
          event!(Level::WARN, error = %e, "Failed to handle message.");
          Err(e)
        }
      }
    }
    .instrument(handling_span)
    .await
  }
}
