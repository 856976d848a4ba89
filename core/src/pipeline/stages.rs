// busline/src/pipeline/stages.rs

//! The six pipeline stages and the ordered behavior composition of each.

use crate::core::behavior::BehaviorId;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::chain::BehaviorChain;
use std::collections::HashMap;
use std::fmt;
use tracing::{event, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
  ReceivePhysical,
  ReceiveLogical,
  Handle,
  SendLogicalBatch,
  SendLogical,
  SendPhysical,
}

impl Stage {
  pub const ALL: [Stage; 6] = [
    Stage::ReceivePhysical,
    Stage::ReceiveLogical,
    Stage::Handle,
    Stage::SendLogicalBatch,
    Stage::SendLogical,
    Stage::SendPhysical,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Stage::ReceivePhysical => "receive-physical",
      Stage::ReceiveLogical => "receive-logical",
      Stage::Handle => "handle",
      Stage::SendLogicalBatch => "send-logical-batch",
      Stage::SendLogical => "send-logical",
      Stage::SendPhysical => "send-physical",
    }
  }

  /// Behaviors of the default composition, in execution order.
  pub fn default_behaviors(&self) -> Vec<BehaviorId> {
    match self {
      Stage::ReceivePhysical => vec![
        BehaviorId::CHILD_SCOPE_OPEN,
        BehaviorId::LOGGING,
        BehaviorId::IMPERSONATE_SENDER,
        BehaviorId::AUDIT,
        BehaviorId::FORWARD,
        BehaviorId::UNIT_OF_WORK,
        BehaviorId::APPLY_INCOMING_TRANSPORT_MUTATORS,
        BehaviorId::RAISE_RECEIVED_EVENT,
        BehaviorId::EXTRACT_LOGICAL_MESSAGES,
        BehaviorId::CALLBACK_INVOCATION,
      ],
      Stage::ReceiveLogical => vec![
        BehaviorId::APPLY_INCOMING_MESSAGE_MUTATORS,
        BehaviorId::DATABUS_RECEIVE,
        BehaviorId::LOAD_HANDLERS,
      ],
      Stage::Handle => vec![BehaviorId::SAGA_PERSISTENCE, BehaviorId::INVOKE_HANDLER],
      Stage::SendLogicalBatch => vec![
        BehaviorId::MULTI_SEND_VALIDATOR,
        BehaviorId::MULTI_MESSAGE_EXPAND,
        BehaviorId::CREATE_PHYSICAL_MESSAGE,
      ],
      Stage::SendLogical => vec![
        BehaviorId::SEND_VALIDATOR,
        BehaviorId::SAGA_SEND,
        BehaviorId::MUTATE_OUTGOING_MESSAGE,
        BehaviorId::DATABUS_SEND,
      ],
      Stage::SendPhysical => vec![
        BehaviorId::SERIALIZE,
        BehaviorId::MUTATE_OUTGOING_PHYSICAL_MESSAGE,
        BehaviorId::DISPATCH_TO_TRANSPORT,
      ],
    }
  }
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Behaviors dropped, as a unit, from receive-physical when logical handling is disabled.
pub const LOGICAL_HANDLING_BEHAVIORS: [BehaviorId; 2] =
  [BehaviorId::EXTRACT_LOGICAL_MESSAGES, BehaviorId::CALLBACK_INVOCATION];

/// Per-stage behavior lists.
///
/// Starts from the default table and may be edited while the process is being configured.
/// Workers share it behind an `Arc`, after which it is read-only.
#[derive(Debug, Clone)]
pub struct StageDefinitions {
  stages: HashMap<Stage, Vec<BehaviorId>>,
}

impl StageDefinitions {
  pub fn new() -> Self {
    Self {
      stages: Stage::ALL.iter().map(|stage| (*stage, stage.default_behaviors())).collect(),
    }
  }

  pub fn behaviors(&self, stage: Stage) -> &[BehaviorId] {
    self.stages.get(&stage).map(Vec::as_slice).unwrap_or(&[])
  }

  fn position(&self, stage: Stage, existing: &BehaviorId) -> PipelineResult<usize> {
    self
      .behaviors(stage)
      .iter()
      .position(|id| id == existing)
      .ok_or_else(|| PipelineError::BehaviorNotInStage {
        stage: stage.to_string(),
        behavior: existing.to_string(),
      })
  }

  /// Inserts `new` right before the first occurrence of `existing`.
  pub fn insert_before(&mut self, stage: Stage, existing: &BehaviorId, new: impl Into<BehaviorId>) -> PipelineResult<()> {
    let idx = self.position(stage, existing)?;
    self.stages.entry(stage).or_default().insert(idx, new.into());
    Ok(())
  }

  /// Inserts `new` right after the first occurrence of `existing`.
  pub fn insert_after(&mut self, stage: Stage, existing: &BehaviorId, new: impl Into<BehaviorId>) -> PipelineResult<()> {
    let idx = self.position(stage, existing)?;
    self.stages.entry(stage).or_default().insert(idx + 1, new.into());
    Ok(())
  }

  pub fn append(&mut self, stage: Stage, new: impl Into<BehaviorId>) {
    self.stages.entry(stage).or_default().push(new.into());
  }

  /// Removes every occurrence of `id`. Returns whether anything was removed.
  pub fn remove(&mut self, stage: Stage, id: &BehaviorId) -> bool {
    let behaviors = self.stages.entry(stage).or_default();
    let before = behaviors.len();
    behaviors.retain(|existing| existing != id);
    before != behaviors.len()
  }

  /// Builds a fresh chain for one invocation of `stage`.
  ///
  /// For receive-physical, the logical-handling behaviors are left out when
  /// `logical_handling_enabled` is false.
  pub fn compose(&self, stage: Stage, logical_handling_enabled: bool) -> BehaviorChain {
    let mut chain = BehaviorChain::new(stage);
    for id in self.behaviors(stage) {
      if stage == Stage::ReceivePhysical && !logical_handling_enabled && LOGICAL_HANDLING_BEHAVIORS.contains(id) {
        continue;
      }
      chain.add(id.clone());
    }
    event!(Level::TRACE, stage = %stage, behaviors = chain.len(), logical_handling_enabled, "Stage chain composed.");
    chain
  }
}

impl Default for StageDefinitions {
  fn default() -> Self {
    Self::new()
  }
}
