// busline/src/core/context_data.rs
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::Arc;

/// Shared, interior-mutable handle to a message carried by a context.
///
/// Cloning the handle shares the underlying value, which is how mutator behaviors
/// and `PipelineFactory::current_transport_message` observe the very instance a
/// caller handed to the pipeline.
///
/// IMPORTANT: guards obtained from this struct are blocking and MUST NOT
/// be held across `.await` suspension points.
#[derive(Debug)]
pub struct ContextData<T: Send + Sync + 'static>(Arc<RwLock<T>>);

impl<T: Send + Sync + 'static> ContextData<T> {
  pub fn new(data: T) -> Self {
    ContextData(Arc::new(RwLock::new(data)))
  }

  pub fn read(&self) -> RwLockReadGuard<'_, T> {
    self.0.read()
  }

  pub fn write(&self) -> RwLockWriteGuard<'_, T> {
    self.0.write()
  }

  /// Guard onto one field, e.g. `message.map_read(|m| &m.headers)`.
  pub fn map_read<F, U: ?Sized>(&self, f: F) -> MappedRwLockReadGuard<'_, U>
  where
    F: FnOnce(&T) -> &U,
  {
    RwLockReadGuard::map(self.read(), f)
  }

  pub fn map_write<F, U: ?Sized>(&self, f: F) -> MappedRwLockWriteGuard<'_, U>
  where
    F: FnOnce(&mut T) -> &mut U,
  {
    RwLockWriteGuard::map(self.write(), f)
  }

  /// True when both handles point at the same instance.
  pub fn ptr_eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.0, &other.0)
  }
}

impl<T: Send + Sync + Clone + 'static> ContextData<T> {
  /// Clones the current value out from under the lock.
  pub fn snapshot(&self) -> T {
    self.read().clone()
  }
}

impl<T: Send + Sync + 'static> Clone for ContextData<T> {
  fn clone(&self) -> Self {
    ContextData(Arc::clone(&self.0))
  }
}

impl<T: Send + Sync + 'static> From<T> for ContextData<T> {
  fn from(data: T) -> Self {
    Self::new(data)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  #[derive(Clone, Debug, Default)]
  struct Envelope {
    id: String,
    headers: HashMap<String, String>,
  }

  #[test]
  fn field_guards_reach_the_shared_value() {
    let message = ContextData::new(Envelope {
      id: "msg-1".to_string(),
      ..Envelope::default()
    });
    let alias = message.clone();

    alias.map_write(|m| &mut m.headers).insert("Tenant".to_string(), "acme".to_string());

    assert!(alias.ptr_eq(&message));
    assert_eq!(message.map_read(|m| &m.headers).get("Tenant").map(String::as_str), Some("acme"));
    assert_eq!(&*message.map_read(|m| m.id.as_str()), "msg-1");
  }

  #[test]
  fn snapshot_is_detached_and_separate_handles_differ() {
    let message = ContextData::new(Envelope::default());
    let before = message.snapshot();
    message.write().id = "msg-2".to_string();

    assert!(before.id.is_empty());
    assert!(!message.ptr_eq(&ContextData::new(message.snapshot())));
  }
}
