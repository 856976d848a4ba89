// busline/src/core/behavior.rs

//! The `Behavior` capability and the identifiers behaviors are registered under.

use crate::core::context::BehaviorContext;
use crate::error::PipelineResult;
use crate::pipeline::chain::Next;
use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// One composable processing step of a stage.
///
/// A behavior receives the stage context and a continuation. Awaiting `next.run(ctx)`
/// executes the remainder of the chain; code placed before and after that call wraps
/// the inner chain. Returning without calling `next` short-circuits the remainder,
/// which is a legitimate outcome and not an error. Returning `Err` aborts the chain
/// and the error propagates, unchanged, to whoever invoked the stage.
///
/// Instances are resolved through the message-scoped builder each time a chain reaches
/// them, so per-message state can live in `self`.
#[async_trait]
pub trait Behavior: Send + Sync {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()>;
}

/// Identifier a behavior is registered and composed under.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BehaviorId(Cow<'static, str>);

impl BehaviorId {
  pub const CHILD_SCOPE_OPEN: BehaviorId = BehaviorId::from_static("child-scope-open");
  pub const LOGGING: BehaviorId = BehaviorId::from_static("logging");
  pub const IMPERSONATE_SENDER: BehaviorId = BehaviorId::from_static("impersonate-sender");
  pub const AUDIT: BehaviorId = BehaviorId::from_static("audit");
  pub const FORWARD: BehaviorId = BehaviorId::from_static("forward");
  pub const UNIT_OF_WORK: BehaviorId = BehaviorId::from_static("unit-of-work");
  pub const APPLY_INCOMING_TRANSPORT_MUTATORS: BehaviorId =
    BehaviorId::from_static("apply-incoming-transport-mutators");
  pub const RAISE_RECEIVED_EVENT: BehaviorId = BehaviorId::from_static("raise-received-event");
  pub const EXTRACT_LOGICAL_MESSAGES: BehaviorId = BehaviorId::from_static("extract-logical-messages");
  pub const CALLBACK_INVOCATION: BehaviorId = BehaviorId::from_static("callback-invocation");

  pub const APPLY_INCOMING_MESSAGE_MUTATORS: BehaviorId = BehaviorId::from_static("apply-incoming-message-mutators");
  pub const DATABUS_RECEIVE: BehaviorId = BehaviorId::from_static("databus-receive");
  pub const LOAD_HANDLERS: BehaviorId = BehaviorId::from_static("load-handlers");

  pub const SAGA_PERSISTENCE: BehaviorId = BehaviorId::from_static("saga-persistence");
  pub const INVOKE_HANDLER: BehaviorId = BehaviorId::from_static("invoke-handler");

  pub const MULTI_SEND_VALIDATOR: BehaviorId = BehaviorId::from_static("multi-send-validator");
  pub const MULTI_MESSAGE_EXPAND: BehaviorId = BehaviorId::from_static("multi-message-expand");
  pub const CREATE_PHYSICAL_MESSAGE: BehaviorId = BehaviorId::from_static("create-physical-message");

  pub const SEND_VALIDATOR: BehaviorId = BehaviorId::from_static("send-validator");
  pub const SAGA_SEND: BehaviorId = BehaviorId::from_static("saga-send");
  pub const MUTATE_OUTGOING_MESSAGE: BehaviorId = BehaviorId::from_static("mutate-outgoing-message");
  pub const DATABUS_SEND: BehaviorId = BehaviorId::from_static("databus-send");

  pub const SERIALIZE: BehaviorId = BehaviorId::from_static("serialize");
  pub const MUTATE_OUTGOING_PHYSICAL_MESSAGE: BehaviorId =
    BehaviorId::from_static("mutate-outgoing-physical-message");
  pub const DISPATCH_TO_TRANSPORT: BehaviorId = BehaviorId::from_static("dispatch-to-transport");

  pub const fn from_static(id: &'static str) -> Self {
    BehaviorId(Cow::Borrowed(id))
  }

  pub fn new(id: impl Into<String>) -> Self {
    BehaviorId(Cow::Owned(id.into()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for BehaviorId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl fmt::Debug for BehaviorId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "BehaviorId({})", self.0)
  }
}

impl From<&'static str> for BehaviorId {
  fn from(id: &'static str) -> Self {
    BehaviorId::from_static(id)
  }
}

impl From<String> for BehaviorId {
  fn from(id: String) -> Self {
    BehaviorId::new(id)
  }
}
