// busline/src/core/context.rs

//! The execution context hierarchy.
//!
//! A `BehaviorContext` is one node in the chain of custody of a message: it optionally
//! wraps a parent node, carries the stage-specific fields of its `ContextKind`, and owns
//! a local data bag. Bag reads fall back to the parent chain; bag writes are always local.

use crate::core::context_data::ContextData;
use crate::core::control::ChainOutcome;
use crate::error::{PipelineError, PipelineResult};
use crate::messages::{LogicalMessage, MessageHandler, SendOptions, TransportMessage};
use crate::pipeline::stages::Stage;
use crate::registry::ObjectBuilder;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Bag key under which the builder of the current scope is stored.
pub const BUILDER_KEY: &str = "busline.Builder";
/// Bag key under which a `ReceivePhysicalMessageContext` stores its incoming message.
pub const INCOMING_PHYSICAL_MESSAGE_KEY: &str = "busline.IncomingPhysicalMessage";

type BagValue = Arc<dyn Any + Send + Sync>;

pub struct BehaviorContext {
  parent: Option<Arc<BehaviorContext>>,
  kind: ContextKind,
  bag: RwLock<HashMap<String, BagValue>>,
  outcome: Mutex<Option<ChainOutcome>>,
}

/// Closed set of context variants, one per stage plus the root.
#[derive(Debug)]
pub enum ContextKind {
  Root,
  ReceivePhysicalMessage(ReceivePhysicalMessageContext),
  ReceiveLogicalMessage(ReceiveLogicalMessageContext),
  HandlerInvocation(HandlerInvocationContext),
  SendLogicalMessages(SendLogicalMessagesContext),
  SendLogicalMessage(SendLogicalMessageContext),
  SendPhysicalMessage(SendPhysicalMessageContext),
}

impl ContextKind {
  pub fn name(&self) -> &'static str {
    match self {
      ContextKind::Root => "Root",
      ContextKind::ReceivePhysicalMessage(_) => ReceivePhysicalMessageContext::KIND_NAME,
      ContextKind::ReceiveLogicalMessage(_) => ReceiveLogicalMessageContext::KIND_NAME,
      ContextKind::HandlerInvocation(_) => HandlerInvocationContext::KIND_NAME,
      ContextKind::SendLogicalMessages(_) => SendLogicalMessagesContext::KIND_NAME,
      ContextKind::SendLogicalMessage(_) => SendLogicalMessageContext::KIND_NAME,
      ContextKind::SendPhysicalMessage(_) => SendPhysicalMessageContext::KIND_NAME,
    }
  }

  /// The stage whose chain runs on this variant. The root belongs to no stage.
  pub fn stage(&self) -> Option<Stage> {
    match self {
      ContextKind::Root => None,
      ContextKind::ReceivePhysicalMessage(_) => Some(Stage::ReceivePhysical),
      ContextKind::ReceiveLogicalMessage(_) => Some(Stage::ReceiveLogical),
      ContextKind::HandlerInvocation(_) => Some(Stage::Handle),
      ContextKind::SendLogicalMessages(_) => Some(Stage::SendLogicalBatch),
      ContextKind::SendLogicalMessage(_) => Some(Stage::SendLogical),
      ContextKind::SendPhysicalMessage(_) => Some(Stage::SendPhysical),
    }
  }
}

/// Implemented by every stage-specific payload so behaviors can ask for it by type.
pub trait ContextVariant: Sized {
  const KIND_NAME: &'static str;
  fn from_kind(kind: &ContextKind) -> Option<&Self>;
}

macro_rules! context_variant {
  ($ty:ident, $variant:ident, $name:literal) => {
    impl ContextVariant for $ty {
      const KIND_NAME: &'static str = $name;
      fn from_kind(kind: &ContextKind) -> Option<&Self> {
        match kind {
          ContextKind::$variant(inner) => Some(inner),
          _ => None,
        }
      }
    }
  };
}

#[derive(Debug)]
pub struct ReceivePhysicalMessageContext {
  message: Option<ContextData<TransportMessage>>,
  logical_messages: RwLock<Vec<LogicalMessage>>,
}

impl ReceivePhysicalMessageContext {
  /// `None` for the context synthesized by logical-only callers.
  pub fn message(&self) -> Option<&ContextData<TransportMessage>> {
    self.message.as_ref()
  }

  pub fn logical_messages(&self) -> Vec<LogicalMessage> {
    self.logical_messages.read().clone()
  }

  pub fn set_logical_messages(&self, messages: Vec<LogicalMessage>) {
    *self.logical_messages.write() = messages;
  }
}

#[derive(Debug)]
pub struct ReceiveLogicalMessageContext {
  message: ContextData<LogicalMessage>,
}

impl ReceiveLogicalMessageContext {
  pub fn message(&self) -> &ContextData<LogicalMessage> {
    &self.message
  }
}

#[derive(Debug)]
pub struct HandlerInvocationContext {
  handler: MessageHandler,
  message: ContextData<LogicalMessage>,
  abort_dispatch: AtomicBool,
}

impl HandlerInvocationContext {
  pub fn handler(&self) -> &MessageHandler {
    &self.handler
  }

  /// The logical message being handled; shared with the enclosing receive-logical context.
  pub fn message(&self) -> &ContextData<LogicalMessage> {
    &self.message
  }

  /// Asks `load-handlers` not to hand the current message to any further handler.
  pub fn abort_dispatch(&self) {
    self.abort_dispatch.store(true, Ordering::SeqCst);
  }

  pub fn is_dispatch_aborted(&self) -> bool {
    self.abort_dispatch.load(Ordering::SeqCst)
  }
}

#[derive(Debug)]
pub struct SendLogicalMessagesContext {
  options: SendOptions,
  messages: Vec<ContextData<LogicalMessage>>,
  outgoing: RwLock<Vec<ContextData<LogicalMessage>>>,
}

impl SendLogicalMessagesContext {
  pub fn options(&self) -> &SendOptions {
    &self.options
  }

  pub fn messages(&self) -> &[ContextData<LogicalMessage>] {
    &self.messages
  }

  /// Messages whose send-logical chain ran to completion, in batch order.
  pub fn outgoing(&self) -> Vec<ContextData<LogicalMessage>> {
    self.outgoing.read().clone()
  }

  pub fn push_outgoing(&self, message: ContextData<LogicalMessage>) {
    self.outgoing.write().push(message);
  }
}

#[derive(Debug)]
pub struct SendLogicalMessageContext {
  options: SendOptions,
  message: ContextData<LogicalMessage>,
}

impl SendLogicalMessageContext {
  pub fn options(&self) -> &SendOptions {
    &self.options
  }

  pub fn message(&self) -> &ContextData<LogicalMessage> {
    &self.message
  }
}

#[derive(Debug)]
pub struct SendPhysicalMessageContext {
  options: SendOptions,
  message: ContextData<TransportMessage>,
  logical_messages: Vec<LogicalMessage>,
}

impl SendPhysicalMessageContext {
  pub fn options(&self) -> &SendOptions {
    &self.options
  }

  pub fn message(&self) -> &ContextData<TransportMessage> {
    &self.message
  }

  /// The logical messages this physical message is built from (empty for raw physical sends).
  pub fn logical_messages(&self) -> &[LogicalMessage] {
    &self.logical_messages
  }
}

context_variant!(ReceivePhysicalMessageContext, ReceivePhysicalMessage, "ReceivePhysicalMessage");
context_variant!(ReceiveLogicalMessageContext, ReceiveLogicalMessage, "ReceiveLogicalMessage");
context_variant!(HandlerInvocationContext, HandlerInvocation, "HandlerInvocation");
context_variant!(SendLogicalMessagesContext, SendLogicalMessages, "SendLogicalMessages");
context_variant!(SendLogicalMessageContext, SendLogicalMessage, "SendLogicalMessage");
context_variant!(SendPhysicalMessageContext, SendPhysicalMessage, "SendPhysicalMessage");

impl BehaviorContext {
  fn with_parent(parent: Option<Arc<BehaviorContext>>, kind: ContextKind) -> Self {
    Self {
      parent,
      kind,
      bag: RwLock::new(HashMap::new()),
      outcome: Mutex::new(None),
    }
  }

  pub fn new_root(builder: Arc<dyn ObjectBuilder>) -> Arc<Self> {
    let ctx = Self::with_parent(None, ContextKind::Root);
    ctx.set(BUILDER_KEY, builder);
    Arc::new(ctx)
  }

  pub fn new_receive_physical(parent: Arc<Self>, message: Option<ContextData<TransportMessage>>) -> Arc<Self> {
    let ctx = Self::with_parent(
      Some(parent),
      ContextKind::ReceivePhysicalMessage(ReceivePhysicalMessageContext {
        message: message.clone(),
        logical_messages: RwLock::new(Vec::new()),
      }),
    );
    if let Some(message) = message {
      ctx.set(INCOMING_PHYSICAL_MESSAGE_KEY, message);
    }
    Arc::new(ctx)
  }

  pub fn new_receive_logical(parent: Arc<Self>, message: LogicalMessage) -> Arc<Self> {
    Arc::new(Self::with_parent(
      Some(parent),
      ContextKind::ReceiveLogicalMessage(ReceiveLogicalMessageContext {
        message: ContextData::new(message),
      }),
    ))
  }

  /// The parent must be a receive-logical context; its message is shared with the handler context.
  pub fn new_handler_invocation(parent: Arc<Self>, handler: MessageHandler) -> PipelineResult<Arc<Self>> {
    let message = parent.variant::<ReceiveLogicalMessageContext>()?.message().clone();
    Ok(Arc::new(Self::with_parent(
      Some(parent),
      ContextKind::HandlerInvocation(HandlerInvocationContext {
        handler,
        message,
        abort_dispatch: AtomicBool::new(false),
      }),
    )))
  }

  pub fn new_send_logical_messages(parent: Arc<Self>, options: SendOptions, messages: Vec<LogicalMessage>) -> Arc<Self> {
    Arc::new(Self::with_parent(
      Some(parent),
      ContextKind::SendLogicalMessages(SendLogicalMessagesContext {
        options,
        messages: messages.into_iter().map(ContextData::new).collect(),
        outgoing: RwLock::new(Vec::new()),
      }),
    ))
  }

  pub fn new_send_logical_message(
    parent: Arc<Self>,
    options: SendOptions,
    message: ContextData<LogicalMessage>,
  ) -> PipelineResult<Arc<Self>> {
    parent.variant::<SendLogicalMessagesContext>()?;
    Ok(Arc::new(Self::with_parent(
      Some(parent),
      ContextKind::SendLogicalMessage(SendLogicalMessageContext { options, message }),
    )))
  }

  pub fn new_send_physical_message(
    parent: Arc<Self>,
    options: SendOptions,
    message: TransportMessage,
    logical_messages: Vec<LogicalMessage>,
  ) -> Arc<Self> {
    Arc::new(Self::with_parent(
      Some(parent),
      ContextKind::SendPhysicalMessage(SendPhysicalMessageContext {
        options,
        message: ContextData::new(message),
        logical_messages,
      }),
    ))
  }

  pub fn parent(&self) -> Option<&Arc<BehaviorContext>> {
    self.parent.as_ref()
  }

  pub fn kind(&self) -> &ContextKind {
    &self.kind
  }

  pub fn kind_name(&self) -> &'static str {
    self.kind.name()
  }

  pub fn stage(&self) -> Option<Stage> {
    self.kind.stage()
  }

  pub fn is_root(&self) -> bool {
    matches!(self.kind, ContextKind::Root)
  }

  /// Stage payload of this context, or `InvalidPipelineState` if it is another variant.
  pub fn variant<V: ContextVariant>(&self) -> PipelineResult<&V> {
    V::from_kind(&self.kind).ok_or_else(|| PipelineError::invalid_state(V::KIND_NAME, self.kind_name()))
  }

  pub fn try_variant<V: ContextVariant>(&self) -> Option<&V> {
    V::from_kind(&self.kind)
  }

  /// Nearest context of variant `V`, starting with this one.
  pub fn find_ancestor<V: ContextVariant>(&self) -> Option<&V> {
    self.ancestors().find_map(|ctx| V::from_kind(&ctx.kind))
  }

  /// This context followed by its parents, up to the root.
  pub fn ancestors(&self) -> impl Iterator<Item = &BehaviorContext> {
    std::iter::successors(Some(self), |&ctx| ctx.parent.as_deref())
  }

  // --- Data bag ---

  /// Looks `key` up in the local bag, then in each ancestor's bag.
  ///
  /// The first bag holding the key decides: if its value is not a `T` the lookup
  /// yields `None` without consulting further ancestors.
  pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
    for ctx in self.ancestors() {
      let value = ctx.bag.read().get(key).cloned();
      if let Some(value) = value {
        return value.downcast::<T>().ok();
      }
    }
    None
  }

  /// Looks `key` up in this context's own bag only.
  pub fn get_local<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
    let value = self.bag.read().get(key).cloned()?;
    value.downcast::<T>().ok()
  }

  pub fn contains(&self, key: &str) -> bool {
    self.ancestors().any(|ctx| ctx.bag.read().contains_key(key))
  }

  /// Writes into this context's own bag; ancestors are never touched.
  pub fn set<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
    self.set_shared(key, Arc::new(value));
  }

  pub fn set_shared<T: Any + Send + Sync>(&self, key: impl Into<String>, value: Arc<T>) {
    self.bag.write().insert(key.into(), value);
  }

  /// Removes `key` from the local bag only. Returns whether it was present.
  pub fn remove(&self, key: &str) -> bool {
    self.bag.write().remove(key).is_some()
  }

  /// `get` keyed by the type name of `T`.
  pub fn get_typed<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
    self.get::<T>(std::any::type_name::<T>())
  }

  pub fn set_typed<T: Any + Send + Sync>(&self, value: T) {
    self.set(std::any::type_name::<T>(), value);
  }

  /// Builder of the innermost scope visible from this context.
  pub fn builder(&self) -> PipelineResult<Arc<dyn ObjectBuilder>> {
    self
      .get::<Arc<dyn ObjectBuilder>>(BUILDER_KEY)
      .map(|builder| Arc::clone(&*builder))
      .ok_or_else(|| PipelineError::invalid_state("context chain with a builder", self.kind_name()))
  }

  /// How the chain that ran on this context ended. `None` while running or if it failed.
  pub fn outcome(&self) -> Option<ChainOutcome> {
    *self.outcome.lock()
  }

  pub(crate) fn set_outcome(&self, outcome: ChainOutcome) {
    *self.outcome.lock() = Some(outcome);
  }
}

impl fmt::Debug for BehaviorContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let keys: Vec<String> = self.bag.read().keys().cloned().collect();
    f.debug_struct("BehaviorContext")
      .field("kind", &self.kind_name())
      .field("bag_keys", &keys)
      .field("has_parent", &self.parent.is_some())
      .finish()
  }
}
