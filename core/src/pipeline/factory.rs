// busline/src/pipeline/factory.rs

//! The `PipelineFactory`: the entry points that run each stage with the right context,
//! keeping the worker's context stack balanced on every exit path.

use crate::core::context::{
  BehaviorContext, ReceivePhysicalMessageContext, INCOMING_PHYSICAL_MESSAGE_KEY,
};
use crate::core::context_data::ContextData;
use crate::core::stack::ContextStack;
use crate::error::{PipelineError, PipelineResult};
use crate::messages::{LogicalMessage, MessageHandler, SendOptions, TransportMessage};
use crate::pipeline::chain::BehaviorChain;
use crate::pipeline::stages::{Stage, StageDefinitions};
use crate::registry::{BehaviorRegistry, ObjectBuilder, RegistryBuilder};
use crate::settings::Settings;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{event, instrument, Level};

/// Settings key read on every receive-physical invocation; absent means enabled.
pub const LOGICAL_MESSAGE_HANDLING_SETTING: &str = "Pipeline.LogicalMessageHandling";

/// Stage orchestrator of one worker.
///
/// Each worker owns its own factory, and with it its own context stack. The stage
/// definitions, settings and registry behind the root builder are shared read-only.
pub struct PipelineFactory {
  root_builder: Arc<dyn ObjectBuilder>,
  stages: Arc<StageDefinitions>,
  settings: Arc<Settings>,
  stack: Mutex<ContextStack>,
  message_handling_disabled: AtomicBool,
}

/// Pops its context when dropped: on return, on error, and on cancellation.
struct StackFrame<'a> {
  stack: &'a Mutex<ContextStack>,
  ctx: Arc<BehaviorContext>,
}

impl Drop for StackFrame<'_> {
  fn drop(&mut self) {
    let mut stack = self.stack.lock();
    // Frames pushed above ours and never popped (an unpaired prepare inside a behavior)
    // are discarded with it.
    while let Some(popped) = stack.pop() {
      if Arc::ptr_eq(&popped, &self.ctx) {
        return;
      }
      event!(Level::WARN, context = popped.kind_name(), "Discarding unbalanced context frame.");
    }
    event!(Level::ERROR, context = self.ctx.kind_name(), "Context frame was already popped.");
  }
}

impl PipelineFactory {
  pub fn new(root_builder: Arc<dyn ObjectBuilder>, stages: Arc<StageDefinitions>, settings: Arc<Settings>) -> Self {
    Self {
      root_builder,
      stages,
      settings,
      stack: Mutex::new(ContextStack::new()),
      message_handling_disabled: AtomicBool::new(false),
    }
  }

  /// Default stage table and empty settings over a registry-backed root builder.
  pub fn with_registry(registry: Arc<BehaviorRegistry>) -> Self {
    Self::new(
      RegistryBuilder::root(registry),
      Arc::new(StageDefinitions::default()),
      Arc::new(Settings::new()),
    )
  }

  pub fn stages(&self) -> &StageDefinitions {
    &self.stages
  }

  pub fn settings(&self) -> &Settings {
    &self.settings
  }

  /// Instance-level override: drop the logical-handling behaviors from receive-physical.
  pub fn disable_logical_message_handling(&self) {
    self.message_handling_disabled.store(true, Ordering::SeqCst);
  }

  /// A missing setting means enabled. A setting that is not a `bool` is reported and
  /// treated as missing.
  pub fn logical_message_handling_enabled(&self) -> bool {
    if self.message_handling_disabled.load(Ordering::SeqCst) {
      return false;
    }
    match self.settings.get::<bool>(LOGICAL_MESSAGE_HANDLING_SETTING) {
      Ok(enabled) => enabled,
      Err(PipelineError::SettingNotFound { .. }) => true,
      Err(e) => {
        event!(Level::WARN, error = %e, "Ignoring logical message handling setting.");
        true
      }
    }
  }

  /// Chain for one invocation of `stage`, composed against the current toggles.
  pub fn compose(&self, stage: Stage) -> BehaviorChain {
    self.stages.compose(stage, self.logical_message_handling_enabled())
  }

  /// Number of frames currently pushed on this worker's stack.
  pub fn stack_depth(&self) -> usize {
    self.stack.lock().depth()
  }

  /// The current context, creating the ambient root if nothing is pushed.
  pub fn current_context(&self) -> Arc<BehaviorContext> {
    self.stack.lock().current_or_insert_root(|| self.new_root())
  }

  fn new_root(&self) -> Arc<BehaviorContext> {
    BehaviorContext::new_root(Arc::clone(&self.root_builder))
  }

  fn push_frame(&self, ctx: Arc<BehaviorContext>) -> StackFrame<'_> {
    self.stack.lock().push(Arc::clone(&ctx));
    StackFrame { stack: &self.stack, ctx }
  }

  /// Pushes `ctx`, runs its stage chain, and pops on every exit path.
  async fn run_stage(&self, ctx: Arc<BehaviorContext>) -> PipelineResult<Arc<BehaviorContext>> {
    let stage = ctx
      .stage()
      .ok_or_else(|| PipelineError::invalid_state("stage context", ctx.kind_name()))?;
    let _frame = self.push_frame(Arc::clone(&ctx));
    let outcome = self.compose(stage).invoke(&ctx, self).await?;
    ctx.set_outcome(outcome);
    Ok(ctx)
  }

  // --- Receive ---

  /// Opens a receive: pushes a physical context for `message` under a fresh root.
  ///
  /// Must be paired with exactly one `complete_physical_context`, even when the receive fails.
  pub fn prepare_physical_context(&self, message: ContextData<TransportMessage>) -> Arc<BehaviorContext> {
    event!(Level::DEBUG, message_id = %message.read().id, "Preparing physical message context.");
    let ctx = BehaviorContext::new_receive_physical(self.new_root(), Some(message));
    self.stack.lock().push(Arc::clone(&ctx));
    ctx
  }

  /// Closes the receive opened by `prepare_physical_context`.
  ///
  /// Fails with `InvalidPipelineState`, leaving the stack untouched, if the current
  /// frame is not a physical receive context.
  pub fn complete_physical_context(&self) -> PipelineResult<()> {
    let mut stack = self.stack.lock();
    let actual = stack.current().map_or("empty stack", |ctx| ctx.kind_name());
    let is_physical = !stack.is_empty()
      && stack
        .current()
        .is_some_and(|ctx| ctx.try_variant::<ReceivePhysicalMessageContext>().is_some());
    if !is_physical {
      return Err(PipelineError::invalid_state(
        "ReceivePhysicalMessage",
        actual,
      ));
    }
    stack.pop();
    Ok(())
  }

  /// Runs receive-physical on the current context, which must come from `prepare_physical_context`.
  #[instrument(name = "PipelineFactory::invoke_receive_physical_pipeline", skip_all, err(Display))]
  pub async fn invoke_receive_physical_pipeline(&self) -> PipelineResult<()> {
    let current = {
      let stack = self.stack.lock();
      if stack.is_empty() {
        None
      } else {
        stack.current().cloned()
      }
    };
    let ctx = match current {
      Some(ctx) if ctx.try_variant::<ReceivePhysicalMessageContext>().is_some() => ctx,
      other => {
        let actual = other.as_ref().map_or("empty stack", |ctx| ctx.kind_name());
        event!(Level::ERROR, current = actual, "Can't invoke the receive pipeline from this context.");
        return Err(PipelineError::invalid_state("ReceivePhysicalMessage", actual));
      }
    };

    let outcome = self.compose(Stage::ReceivePhysical).invoke(&ctx, self).await?;
    ctx.set_outcome(outcome);
    Ok(())
  }

  /// Runs receive-logical for `message` under a synthesized physical context with no
  /// transport message, for callers without a receive in progress.
  pub async fn invoke_logical_pipeline(&self, message: LogicalMessage) -> PipelineResult<Arc<BehaviorContext>> {
    let physical = BehaviorContext::new_receive_physical(self.new_root(), None);
    self.invoke_logical_pipeline_with(&physical, message).await
  }

  #[instrument(
        name = "PipelineFactory::invoke_logical_pipeline",
        skip_all,
        fields(message_type = %message.message_type),
        err(Display)
    )]
  pub async fn invoke_logical_pipeline_with(
    &self,
    physical: &Arc<BehaviorContext>,
    message: LogicalMessage,
  ) -> PipelineResult<Arc<BehaviorContext>> {
    physical.variant::<ReceivePhysicalMessageContext>()?;
    let ctx = BehaviorContext::new_receive_logical(Arc::clone(physical), message);
    self.run_stage(ctx).await
  }

  /// Runs the handle stage for one handler; the returned context carries handler-scoped data.
  #[instrument(
        name = "PipelineFactory::invoke_handler_pipeline",
        skip_all,
        fields(handler = %handler.name),
        err(Display)
    )]
  pub async fn invoke_handler_pipeline(
    &self,
    logical: &Arc<BehaviorContext>,
    handler: MessageHandler,
  ) -> PipelineResult<Arc<BehaviorContext>> {
    let ctx = BehaviorContext::new_handler_invocation(Arc::clone(logical), handler)?;
    self.run_stage(ctx).await
  }

  // --- Send ---

  /// Runs send-logical-batch once for `messages`, wrapping the ambient current context.
  #[instrument(
        name = "PipelineFactory::invoke_send_pipeline",
        skip_all,
        fields(num_messages = messages.len(), intent = %options.intent),
        err(Display)
    )]
  pub async fn invoke_send_pipeline(
    &self,
    options: SendOptions,
    messages: Vec<LogicalMessage>,
  ) -> PipelineResult<Arc<BehaviorContext>> {
    let ctx = BehaviorContext::new_send_logical_messages(self.current_context(), options, messages);
    self.run_stage(ctx).await
  }

  /// Runs send-logical for one message of `batch`.
  pub async fn invoke_send_logical_pipeline(
    &self,
    batch: &Arc<BehaviorContext>,
    options: SendOptions,
    message: ContextData<LogicalMessage>,
  ) -> PipelineResult<Arc<BehaviorContext>> {
    let ctx = BehaviorContext::new_send_logical_message(Arc::clone(batch), options, message)?;
    self.run_stage(ctx).await
  }

  /// Runs send-physical once for an already built transport message.
  pub async fn invoke_send_physical_pipeline(
    &self,
    options: SendOptions,
    message: TransportMessage,
  ) -> PipelineResult<Arc<BehaviorContext>> {
    self.invoke_send_physical_pipeline_for(options, message, Vec::new()).await
  }

  /// Runs send-physical for `message` built from `logical_messages`, which the
  /// serialize step writes into the body.
  #[instrument(
        name = "PipelineFactory::invoke_send_physical_pipeline",
        skip_all,
        fields(message_id = %message.id, num_logical = logical_messages.len()),
        err(Display)
    )]
  pub async fn invoke_send_physical_pipeline_for(
    &self,
    options: SendOptions,
    message: TransportMessage,
    logical_messages: Vec<LogicalMessage>,
  ) -> PipelineResult<Arc<BehaviorContext>> {
    let ctx = BehaviorContext::new_send_physical_message(self.current_context(), options, message, logical_messages);
    self.run_stage(ctx).await
  }

  /// The incoming transport message of the receive in progress, if any.
  pub fn current_transport_message(&self) -> Option<ContextData<TransportMessage>> {
    self
      .current_context()
      .get::<ContextData<TransportMessage>>(INCOMING_PHYSICAL_MESSAGE_KEY)
      .map(|message| (*message).clone())
  }
}

impl std::fmt::Debug for PipelineFactory {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PipelineFactory")
      .field("stack_depth", &self.stack_depth())
      .field("logical_handling_enabled", &self.logical_message_handling_enabled())
      .finish()
  }
}
