// busline/src/messages.rs

//! In-memory message representations handed to the pipeline by its collaborators.

use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Well-known header names written by the outgoing stages.
pub mod headers {
  pub const MESSAGE_ID: &str = "Bus.MessageId";
  pub const ENCLOSED_MESSAGE_TYPES: &str = "Bus.EnclosedMessageTypes";
  pub const MESSAGE_INTENT: &str = "Bus.MessageIntent";
  pub const CORRELATION_ID: &str = "Bus.CorrelationId";
  pub const REPLY_TO_ADDRESS: &str = "Bus.ReplyToAddress";
  pub const CONTENT_TYPE: &str = "Bus.ContentType";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageIntent {
  #[default]
  Send,
  Publish,
  Reply,
}

impl MessageIntent {
  pub fn as_str(&self) -> &'static str {
    match self {
      MessageIntent::Send => "Send",
      MessageIntent::Publish => "Publish",
      MessageIntent::Reply => "Reply",
    }
  }
}

impl fmt::Display for MessageIntent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// The raw transport-level message as received or sent over the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportMessage {
  pub id: String,
  pub headers: HashMap<String, String>,
  pub body: Vec<u8>,
  pub intent: MessageIntent,
  pub correlation_id: Option<String>,
  pub reply_to_address: Option<String>,
}

impl TransportMessage {
  pub fn new(id: impl Into<String>, body: Vec<u8>) -> Self {
    Self {
      id: id.into(),
      body,
      ..Default::default()
    }
  }

  pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(key.into(), value.into());
    self
  }
}

/// One application-level message. The instance is type-erased; `message_type`
/// keeps the name used for handler lookup and for the enclosed-types header.
#[derive(Clone)]
pub struct LogicalMessage {
  pub message_type: String,
  pub instance: Arc<dyn Any + Send + Sync>,
  pub headers: HashMap<String, String>,
}

impl LogicalMessage {
  pub fn new<M: Any + Send + Sync>(instance: M) -> Self {
    Self {
      message_type: std::any::type_name::<M>().to_string(),
      instance: Arc::new(instance),
      headers: HashMap::new(),
    }
  }

  /// Same as `new` but with an explicit type name (e.g. one read from a header).
  pub fn named<M: Any + Send + Sync>(message_type: impl Into<String>, instance: M) -> Self {
    Self {
      message_type: message_type.into(),
      instance: Arc::new(instance),
      headers: HashMap::new(),
    }
  }

  pub fn downcast_ref<M: Any>(&self) -> Option<&M> {
    self.instance.downcast_ref::<M>()
  }

  pub fn is<M: Any>(&self) -> bool {
    self.instance.is::<M>()
  }
}

impl fmt::Debug for LogicalMessage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LogicalMessage")
      .field("message_type", &self.message_type)
      .field("headers", &self.headers)
      .finish_non_exhaustive()
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
  pub destination: Option<String>,
  pub intent: MessageIntent,
  pub correlation_id: Option<String>,
  pub reply_to_address: Option<String>,
}

impl SendOptions {
  pub fn send_to(destination: impl Into<String>) -> Self {
    Self {
      destination: Some(destination.into()),
      intent: MessageIntent::Send,
      ..Default::default()
    }
  }

  pub fn publish() -> Self {
    Self {
      intent: MessageIntent::Publish,
      ..Default::default()
    }
  }

  pub fn reply_to(destination: impl Into<String>, correlation_id: impl Into<String>) -> Self {
    Self {
      destination: Some(destination.into()),
      intent: MessageIntent::Reply,
      correlation_id: Some(correlation_id.into()),
      reply_to_address: None,
    }
  }
}

/// A user message handler. Handlers are matched upstream and handed to the handle stage.
#[async_trait]
pub trait HandleMessages: Send + Sync {
  async fn handle(&self, message: &LogicalMessage) -> anyhow::Result<()>;
}

/// Descriptor of one matched handler.
#[derive(Clone)]
pub struct MessageHandler {
  pub name: String,
  pub instance: Arc<dyn HandleMessages>,
}

impl MessageHandler {
  pub fn new(name: impl Into<String>, instance: Arc<dyn HandleMessages>) -> Self {
    Self {
      name: name.into(),
      instance,
    }
  }
}

impl fmt::Debug for MessageHandler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MessageHandler").field("name", &self.name).finish_non_exhaustive()
  }
}
