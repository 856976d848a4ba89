// busline/src/behaviors/unit_of_work.rs

use crate::core::behavior::Behavior;
use crate::core::context::BehaviorContext;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::chain::Next;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{event, Level};

/// A unit of work spanning the processing of one physical message.
#[async_trait]
pub trait ManageUnitsOfWork: Send + Sync {
  async fn begin(&self) -> anyhow::Result<()>;

  /// `error` is the failure of the inner chain, if it failed.
  async fn end(&self, error: Option<&PipelineError>) -> anyhow::Result<()>;
}

/// `unit-of-work`: begins every unit in order, runs the inner chain, then ends the units
/// that were begun in reverse order.
///
/// A failure of the inner chain is handed to every `end` and then returned unchanged.
/// Without one, the first failing `end` is returned after all units were ended.
pub struct UnitOfWorkBehavior {
  units: Vec<Arc<dyn ManageUnitsOfWork>>,
}

impl UnitOfWorkBehavior {
  pub fn new(units: Vec<Arc<dyn ManageUnitsOfWork>>) -> Self {
    Self { units }
  }

  async fn end_all(begun: &[Arc<dyn ManageUnitsOfWork>], error: Option<&PipelineError>) -> PipelineResult<()> {
    let mut first_failure = None;
    for unit in begun.iter().rev() {
      if let Err(e) = unit.end(error).await {
        event!(Level::WARN, error = %e, "Unit of work failed to end.");
        first_failure.get_or_insert(e);
      }
    }
    match first_failure {
      Some(e) => Err(e.into()),
      None => Ok(()),
    }
  }
}

#[async_trait]
impl Behavior for UnitOfWorkBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    let mut begun: Vec<Arc<dyn ManageUnitsOfWork>> = Vec::with_capacity(self.units.len());
    for unit in &self.units {
      if let Err(e) = unit.begin().await {
        let begin_error = PipelineError::from(e);
        // Already begun units still get their end call; the begin failure wins.
        let _ = Self::end_all(&begun, Some(&begin_error)).await;
        return Err(begin_error);
      }
      begun.push(Arc::clone(unit));
    }

    match next.run(ctx).await {
      Ok(()) => Self::end_all(&begun, None).await,
      Err(e) => {
        let _ = Self::end_all(&begun, Some(&e)).await;
        Err(e)
      }
    }
  }
}
