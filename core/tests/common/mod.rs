// tests/common/mod.rs
#![allow(dead_code)] // Not every test file uses every helper.

use async_trait::async_trait;
use busline::behaviors::{
  ChildScopeBehavior, DispatchMessages, ExtractLogicalMessages, ExtractLogicalMessagesBehavior, HandlerRegistry,
  InvokeHandlerBehavior, LoadHandlersBehavior, MessageHandlingLoggingBehavior, MessageSerializer,
  CreatePhysicalMessageBehavior, DispatchMessageToTransportBehavior, MultiMessageBehavior, SerializeMessagesBehavior,
};
use busline::{
  Behavior, BehaviorContext, BehaviorId, BehaviorRegistry, HandleMessages, LogicalMessage, MessageHandler, Next,
  PipelineError, PipelineFactory, PipelineResult, SendOptions, Stage, TransportMessage,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::Level;

// --- Messages used across tests ---
#[derive(Clone, Debug, PartialEq)]
pub struct OrderPlaced {
  pub order_id: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBilled {
  pub order_id: u32,
}

/// Ordered record of what ran, shared by every test behavior and collaborator.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn new_journal() -> Journal {
  Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(journal: &Journal) -> Vec<String> {
  journal.lock().clone()
}

pub fn count(journal: &Journal, entry: &str) -> usize {
  journal.lock().iter().filter(|e| e.as_str() == entry).count()
}

// --- Behaviors ---

/// Records its name and continues.
pub struct RecordingBehavior {
  name: String,
  journal: Journal,
}

impl RecordingBehavior {
  pub fn new(name: impl Into<String>, journal: Journal) -> Self {
    Self {
      name: name.into(),
      journal,
    }
  }
}

#[async_trait]
impl Behavior for RecordingBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    self.journal.lock().push(self.name.clone());
    next.run(ctx).await
  }
}

/// Records its name and returns without calling `next`.
pub struct StopBehavior {
  name: String,
  journal: Journal,
}

impl StopBehavior {
  pub fn new(name: impl Into<String>, journal: Journal) -> Self {
    Self {
      name: name.into(),
      journal,
    }
  }
}

#[async_trait]
impl Behavior for StopBehavior {
  async fn invoke(&self, _ctx: &Arc<BehaviorContext>, _next: Next<'_>) -> PipelineResult<()> {
    self.journal.lock().push(self.name.clone());
    Ok(())
  }
}

/// Records its name and fails with `message`.
pub struct FailingBehavior {
  name: String,
  message: &'static str,
  journal: Journal,
}

impl FailingBehavior {
  pub fn new(name: impl Into<String>, message: &'static str, journal: Journal) -> Self {
    Self {
      name: name.into(),
      message,
      journal,
    }
  }
}

#[async_trait]
impl Behavior for FailingBehavior {
  async fn invoke(&self, _ctx: &Arc<BehaviorContext>, _next: Next<'_>) -> PipelineResult<()> {
    self.journal.lock().push(self.name.clone());
    tracing::warn!(target: "test_behaviors", behavior = %self.name, "failing with: '{}'", self.message);
    Err(anyhow::anyhow!(self.message).into())
  }
}

/// Records `name` and then delegates to a real behavior.
pub struct Journaled<B> {
  name: String,
  journal: Journal,
  inner: B,
}

impl<B: Behavior> Journaled<B> {
  pub fn new(name: impl Into<String>, journal: Journal, inner: B) -> Self {
    Self {
      name: name.into(),
      journal,
      inner,
    }
  }
}

#[async_trait]
impl<B: Behavior> Behavior for Journaled<B> {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    self.journal.lock().push(self.name.clone());
    self.inner.invoke(ctx, next).await
  }
}

type InspectFn = dyn Fn(&Arc<BehaviorContext>, &PipelineFactory) -> PipelineResult<()> + Send + Sync;

/// Runs a synchronous check against the context, then continues.
pub struct InspectBehavior {
  inspect: Arc<InspectFn>,
}

impl InspectBehavior {
  pub fn new<F>(inspect: F) -> Self
  where
    F: Fn(&Arc<BehaviorContext>, &PipelineFactory) -> PipelineResult<()> + Send + Sync + 'static,
  {
    Self { inspect: Arc::new(inspect) }
  }
}

#[async_trait]
impl Behavior for InspectBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    (self.inspect)(ctx, next.pipeline())?;
    next.run(ctx).await
  }
}

// --- Collaborators ---

pub struct FixedExtractor {
  pub messages: Vec<LogicalMessage>,
}

impl ExtractLogicalMessages for FixedExtractor {
  fn extract(&self, _message: &TransportMessage) -> anyhow::Result<Vec<LogicalMessage>> {
    Ok(self.messages.clone())
  }
}

/// Hands every message to the same handlers.
pub struct FixedHandlers {
  pub handlers: Vec<MessageHandler>,
}

impl HandlerRegistry for FixedHandlers {
  fn handlers_for(&self, _message: &LogicalMessage) -> Vec<MessageHandler> {
    self.handlers.clone()
  }
}

/// Records `handler:<name>` for every message it handles.
pub struct RecordingHandler {
  name: String,
  journal: Journal,
}

impl RecordingHandler {
  pub fn descriptor(name: &str, journal: &Journal) -> MessageHandler {
    MessageHandler::new(
      name,
      Arc::new(RecordingHandler {
        name: name.to_string(),
        journal: Arc::clone(journal),
      }),
    )
  }
}

#[async_trait]
impl HandleMessages for RecordingHandler {
  async fn handle(&self, message: &LogicalMessage) -> anyhow::Result<()> {
    tracing::debug!(target: "test_handlers", handler = %self.name, message_type = %message.message_type, "handled");
    self.journal.lock().push(format!("handler:{}", self.name));
    Ok(())
  }
}

/// Writes the comma-separated message type names as the body.
pub struct TypeNameSerializer;

impl MessageSerializer for TypeNameSerializer {
  fn content_type(&self) -> &str {
    "text/plain"
  }

  fn serialize(&self, messages: &[LogicalMessage]) -> anyhow::Result<Vec<u8>> {
    let names: Vec<&str> = messages.iter().map(|m| m.message_type.as_str()).collect();
    Ok(names.join(",").into_bytes())
  }
}

#[derive(Default)]
pub struct CollectingTransport {
  pub sent: Mutex<Vec<(TransportMessage, SendOptions)>>,
}

#[async_trait]
impl DispatchMessages for CollectingTransport {
  async fn dispatch(&self, message: TransportMessage, options: &SendOptions) -> anyhow::Result<()> {
    tokio::task::yield_now().await;
    self.sent.lock().push((message, options.clone()));
    Ok(())
  }
}

// --- Harness ---

/// A registry where every identifier of the default stage table records itself and
/// continues, with `child-scope-open` and `logging` doing their real work.
pub struct Harness {
  pub journal: Journal,
  pub registry: Arc<BehaviorRegistry>,
}

impl Harness {
  pub fn new() -> Self {
    setup_tracing();
    let journal = new_journal();
    let registry = Arc::new(BehaviorRegistry::new());
    for stage in Stage::ALL {
      for id in stage.default_behaviors() {
        let journal = Arc::clone(&journal);
        let name = id.to_string();
        registry.register(id, move || RecordingBehavior::new(name.clone(), Arc::clone(&journal)));
      }
    }
    let harness = Self { journal, registry };
    harness.install(BehaviorId::CHILD_SCOPE_OPEN, ChildScopeBehavior);
    harness.install(BehaviorId::LOGGING, MessageHandlingLoggingBehavior);
    harness
  }

  /// Replaces the behavior registered under `id`; the replacement still records `id`.
  pub fn install<B: Behavior + 'static>(&self, id: BehaviorId, behavior: B) {
    let wrapped = Journaled::new(id.to_string(), Arc::clone(&self.journal), behavior);
    self.registry.register_shared(id, Arc::new(wrapped));
  }

  /// Installs a behavior that does not record itself.
  pub fn install_raw(&self, id: BehaviorId, behavior: Arc<dyn Behavior>) {
    self.registry.register_shared(id, behavior);
  }

  /// Real extraction, handler loading and invocation.
  pub fn with_receive_plumbing(self, messages: Vec<LogicalMessage>, handlers: Vec<MessageHandler>) -> Self {
    self.install(
      BehaviorId::EXTRACT_LOGICAL_MESSAGES,
      ExtractLogicalMessagesBehavior::new(Arc::new(FixedExtractor { messages })),
    );
    self.install(
      BehaviorId::LOAD_HANDLERS,
      LoadHandlersBehavior::new(Arc::new(FixedHandlers { handlers })),
    );
    self.install(BehaviorId::INVOKE_HANDLER, InvokeHandlerBehavior);
    self
  }

  /// Real batch expansion, physical message creation, serialization and dispatch.
  pub fn with_send_plumbing(self, transport: Arc<CollectingTransport>) -> Self {
    self.install(BehaviorId::MULTI_MESSAGE_EXPAND, MultiMessageBehavior);
    self.install(BehaviorId::CREATE_PHYSICAL_MESSAGE, CreatePhysicalMessageBehavior);
    self.install(
      BehaviorId::SERIALIZE,
      SerializeMessagesBehavior::new(Arc::new(TypeNameSerializer)),
    );
    self.install(
      BehaviorId::DISPATCH_TO_TRANSPORT,
      DispatchMessageToTransportBehavior::new(transport),
    );
    self
  }

  pub fn factory(&self) -> PipelineFactory {
    PipelineFactory::with_registry(Arc::clone(&self.registry))
  }

  pub fn entries(&self) -> Vec<String> {
    entries(&self.journal)
  }

  pub fn count(&self, entry: &str) -> usize {
    count(&self.journal, entry)
  }
}

pub fn incoming(id: &str) -> TransportMessage {
  TransportMessage::new(id, b"payload".to_vec())
}

pub fn behavior_error_message(err: &PipelineError) -> Option<String> {
  match err {
    PipelineError::Behavior { source } => Some(source.to_string()),
    _ => None,
  }
}

// --- Helper for Tracing Setup (call once per test run if needed) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}
