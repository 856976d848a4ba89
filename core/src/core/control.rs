// busline/src/core/control.rs

//! Outcome of a behavior chain invocation.

/// How a chain invocation that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOutcome {
  /// Every behavior called its continuation; the terminal no-op was reached.
  Completed,
  /// Some behavior returned without calling its continuation.
  ShortCircuited,
}

impl ChainOutcome {
  pub fn is_completed(&self) -> bool {
    matches!(self, ChainOutcome::Completed)
  }
}
