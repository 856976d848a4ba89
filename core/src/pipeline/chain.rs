// busline/src/pipeline/chain.rs

//! Contains `BehaviorChain`, the ordered list of behaviors of one stage invocation,
//! and `Next`, the continuation a behavior calls to run the remainder of the chain.

use crate::core::behavior::BehaviorId;
use crate::core::context::BehaviorContext;
use crate::core::control::ChainOutcome;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::factory::PipelineFactory;
use crate::pipeline::stages::Stage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{event, instrument, span, Instrument, Level};

/// Behaviors of one stage, bound to that stage's context variant.
///
/// Built fresh for every stage invocation. Execution order equals append order and the
/// same identifier may appear more than once.
#[derive(Debug, Clone)]
pub struct BehaviorChain {
  stage: Stage,
  behaviors: Vec<BehaviorId>,
}

impl BehaviorChain {
  pub fn new(stage: Stage) -> Self {
    Self {
      stage,
      behaviors: Vec::new(),
    }
  }

  pub fn add(&mut self, id: impl Into<BehaviorId>) -> &mut Self {
    self.behaviors.push(id.into());
    self
  }

  pub fn stage(&self) -> Stage {
    self.stage
  }

  pub fn behaviors(&self) -> &[BehaviorId] {
    &self.behaviors
  }

  pub fn len(&self) -> usize {
    self.behaviors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.behaviors.is_empty()
  }

  /// Runs the chain against `ctx`, which must be this chain's stage variant.
  ///
  /// Behaviors are resolved one at a time through `ctx.builder()` when the chain reaches
  /// them, so a scope opened by an earlier behavior serves the later ones.
  /// Errors from behaviors are returned as they were raised.
  #[instrument(
        name = "BehaviorChain::invoke",
        skip_all,
        fields(
            stage = %self.stage,
            num_behaviors = self.behaviors.len(),
        ),
        err(Display)
    )]
  pub async fn invoke(&self, ctx: &Arc<BehaviorContext>, pipeline: &PipelineFactory) -> PipelineResult<ChainOutcome> {
    if ctx.stage() != Some(self.stage) {
      event!(Level::ERROR, context = ctx.kind_name(), "Chain invoked with a context of another stage.");
      return Err(PipelineError::invalid_state(
        format!("{} stage", self.stage),
        ctx.kind_name(),
      ));
    }

    event!(Level::DEBUG, "Chain execution starting.");
    let reached_end = AtomicBool::new(false);
    let next = Next {
      remaining: &self.behaviors,
      position: 0,
      stage: self.stage,
      pipeline,
      reached_end: &reached_end,
    };
    next.run(ctx).await?;

    let outcome = if reached_end.load(Ordering::SeqCst) {
      ChainOutcome::Completed
    } else {
      ChainOutcome::ShortCircuited
    };
    event!(Level::DEBUG, ?outcome, "Chain execution finished.");
    Ok(outcome)
  }
}

/// Continuation handed to a behavior: the behaviors after it in the chain.
///
/// `run` may be awaited more than once (retry around the inner chain) or not at all
/// (short-circuit). Once the chain is exhausted `run` is a no-op.
#[derive(Clone, Copy)]
pub struct Next<'a> {
  remaining: &'a [BehaviorId],
  position: usize,
  stage: Stage,
  pipeline: &'a PipelineFactory,
  reached_end: &'a AtomicBool,
}

impl<'a> Next<'a> {
  /// The worker's pipeline, for behaviors that drive nested stages.
  ///
  /// Nested stages share the worker's context stack and must be awaited one at a time.
  /// Running two of them concurrently (e.g. with `join!`) makes the second wrap the first
  /// one's in-flight context.
  pub fn pipeline(&self) -> &'a PipelineFactory {
    self.pipeline
  }

  pub fn stage(&self) -> Stage {
    self.stage
  }

  /// Identifiers still to run, in order.
  pub fn remaining(&self) -> &'a [BehaviorId] {
    self.remaining
  }

  pub async fn run(&self, ctx: &Arc<BehaviorContext>) -> PipelineResult<()> {
    let Some((id, rest)) = self.remaining.split_first() else {
      self.reached_end.store(true, Ordering::SeqCst);
      event!(Level::TRACE, stage = %self.stage, "End of chain reached.");
      return Ok(());
    };

    let behavior = ctx.builder()?.build(id)?;
    let next = Next {
      remaining: rest,
      position: self.position + 1,
      ..*self
    };

    let behavior_span = span!(
      Level::DEBUG,
      "behavior_invocation",
      behavior = %id,
      stage = %self.stage,
      position = self.position
    );
    behavior.invoke(ctx, next).instrument(behavior_span).await.map_err(|e| {
      event!(Level::DEBUG, behavior = %id, error = %e, "Behavior aborted the chain.");
      e
    })
  }
}
