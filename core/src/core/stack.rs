// busline/src/core/stack.rs

//! Worker-local stack tracking the current context.

use crate::core::context::BehaviorContext;
use std::sync::Arc;

/// Tracks the current context of one worker.
///
/// The ambient root sits beneath the pushed frames. It is created on the first
/// `current_or_insert_root` against an empty stack and stays for the lifetime of the
/// stack; `pop` never removes it and `depth` does not count it.
#[derive(Debug, Default)]
pub struct ContextStack {
  root: Option<Arc<BehaviorContext>>,
  frames: Vec<Arc<BehaviorContext>>,
}

impl ContextStack {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, ctx: Arc<BehaviorContext>) {
    self.frames.push(ctx);
  }

  /// Removes the topmost frame, making its predecessor current.
  pub fn pop(&mut self) -> Option<Arc<BehaviorContext>> {
    self.frames.pop()
  }

  /// Topmost frame, or the ambient root if no frame is pushed.
  pub fn current(&self) -> Option<&Arc<BehaviorContext>> {
    self.frames.last().or(self.root.as_ref())
  }

  pub fn current_or_insert_root<F>(&mut self, make_root: F) -> Arc<BehaviorContext>
  where
    F: FnOnce() -> Arc<BehaviorContext>,
  {
    if let Some(current) = self.frames.last() {
      return Arc::clone(current);
    }
    Arc::clone(self.root.get_or_insert_with(make_root))
  }

  /// Number of pushed frames.
  pub fn depth(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::registry::{BehaviorRegistry, RegistryBuilder};

  fn root() -> Arc<BehaviorContext> {
    BehaviorContext::new_root(RegistryBuilder::root(Arc::new(BehaviorRegistry::new())))
  }

  #[test]
  fn push_and_pop_restore_previous_current() {
    let mut stack = ContextStack::new();
    let outer = BehaviorContext::new_receive_physical(root(), None);
    let inner = BehaviorContext::new_receive_logical(outer.clone(), crate::LogicalMessage::new(7u8));

    stack.push(outer.clone());
    stack.push(inner.clone());
    assert!(Arc::ptr_eq(stack.current().unwrap(), &inner));

    let popped = stack.pop().unwrap();
    assert!(Arc::ptr_eq(&popped, &inner));
    assert!(Arc::ptr_eq(stack.current().unwrap(), &outer));
    assert_eq!(stack.depth(), 1);
  }

  #[test]
  fn root_is_created_once_and_not_counted() {
    let mut stack = ContextStack::new();
    assert!(stack.current().is_none());

    let first = stack.current_or_insert_root(root);
    let second = stack.current_or_insert_root(root);

    assert!(first.is_root());
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(stack.depth(), 0);
    assert!(stack.pop().is_none());
    assert!(stack.current().is_some());
  }
}
