// busline/src/error.rs
use anyhow::Error as AnyhowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
  /// A stage API was invoked while the current context is not the variant it requires.
  #[error("Invalid pipeline state: expected {expected} context, current context is {actual}")]
  InvalidPipelineState { expected: String, actual: String },

  /// Raised by a behavior (or a collaborator it called) while the chain was running.
  #[error("Behavior execution failed. Source: {source}")]
  Behavior {
    #[source]
    source: AnyhowError,
  },

  #[error("Unable to set the value for key: {key}. The settings have been locked for modifications")]
  ConfigurationLocked { key: String },

  #[error("Setting not found: {key}")]
  SettingNotFound { key: String },

  #[error("Setting '{key}' is not of type {expected}")]
  SettingTypeMismatch { key: String, expected: String },

  #[error("No behavior registered for identifier '{behavior}'")]
  BehaviorNotRegistered { behavior: String },

  #[error("Behavior '{behavior}' is not part of the {stage} stage")]
  BehaviorNotInStage { stage: String, behavior: String },

  #[error("The builder scope has already been released")]
  ScopeReleased,

  #[error("No handlers could be found for message type: {message_type}")]
  NoHandlers { message_type: String },
}

impl PipelineError {
  pub(crate) fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
    PipelineError::InvalidPipelineState {
      expected: expected.into(),
      actual: actual.into(),
    }
  }

  /// True for the invalid-pipeline-state class of errors.
  pub fn is_invalid_state(&self) -> bool {
    matches!(self, PipelineError::InvalidPipelineState { .. })
  }
}

// Behaviors use `?` on anything convertible to anyhow. A PipelineError that went through
// anyhow (e.g. from a nested chain inside a collaborator) is unwrapped, not nested.
impl From<AnyhowError> for PipelineError {
  fn from(err: AnyhowError) -> Self {
    match err.downcast::<PipelineError>() {
      Ok(pipeline_err) => pipeline_err,
      Err(source) => PipelineError::Behavior { source },
    }
  }
}

pub type PipelineResult<T, E = PipelineError> = std::result::Result<T, E>;
