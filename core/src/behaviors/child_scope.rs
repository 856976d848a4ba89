// busline/src/behaviors/child_scope.rs

use crate::core::behavior::Behavior;
use crate::core::context::{BehaviorContext, BUILDER_KEY};
use crate::error::PipelineResult;
use crate::pipeline::chain::Next;
use crate::registry::ObjectBuilder;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{event, Level};

/// `child-scope-open`: gives the rest of the message's processing its own builder scope.
///
/// The child builder is stored in the context's bag, so every behavior resolved below this
/// one (including those of nested stages) comes from it. The scope is released when the
/// inner chain returns, fails, or is dropped; a builder the caller had set on the same
/// context is put back.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChildScopeBehavior;

struct ScopeGuard<'a> {
  ctx: &'a BehaviorContext,
  child: Arc<dyn ObjectBuilder>,
  // Builder the caller had installed on this very context, if any.
  previous: Option<Arc<Arc<dyn ObjectBuilder>>>,
}

impl Drop for ScopeGuard<'_> {
  fn drop(&mut self) {
    match self.previous.take() {
      Some(previous) => self.ctx.set_shared(BUILDER_KEY, previous),
      None => {
        self.ctx.remove(BUILDER_KEY);
      }
    }
    self.child.release();
    event!(Level::TRACE, context = self.ctx.kind_name(), "Child builder scope closed.");
  }
}

#[async_trait]
impl Behavior for ChildScopeBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    let child = ctx.builder()?.create_child_builder();
    let previous = ctx.get_local::<Arc<dyn ObjectBuilder>>(BUILDER_KEY);
    ctx.set(BUILDER_KEY, Arc::clone(&child));
    let _scope = ScopeGuard { ctx, child, previous };
    event!(Level::TRACE, context = ctx.kind_name(), "Child builder scope opened.");
    next.run(ctx).await
  }
}
