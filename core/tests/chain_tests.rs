// tests/chain_tests.rs
mod common;

use async_trait::async_trait;
use busline::{
  Behavior, BehaviorChain, BehaviorContext, BehaviorId, BehaviorRegistry, ChainOutcome, LogicalMessage, Next,
  PipelineError, PipelineFactory, PipelineResult, RegistryBuilder, SendOptions, Stage, TransportMessage,
};
use common::*;
use std::sync::Arc;

/// Records `<name>:before`, runs the rest, records `<name>:after`.
struct WrappingBehavior {
  name: &'static str,
  journal: Journal,
}

#[async_trait]
impl Behavior for WrappingBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    self.journal.lock().push(format!("{}:before", self.name));
    let result = next.run(ctx).await;
    self.journal.lock().push(format!("{}:after", self.name));
    result
  }
}

/// Runs the remainder of the chain until it succeeds, at most `attempts` times.
struct RetryBehavior {
  attempts: usize,
}

#[async_trait]
impl Behavior for RetryBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    let mut last = Ok(());
    for _ in 0..self.attempts {
      last = next.run(ctx).await;
      if last.is_ok() {
        break;
      }
    }
    last
  }
}

/// Fails the first `failures` invocations, then records and continues.
struct FlakyBehavior {
  remaining_failures: parking_lot::Mutex<usize>,
  journal: Journal,
}

#[async_trait]
impl Behavior for FlakyBehavior {
  async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
    {
      let mut remaining = self.remaining_failures.lock();
      if *remaining > 0 {
        *remaining -= 1;
        self.journal.lock().push("flaky:failed".to_string());
        return Err(anyhow::anyhow!("transient").into());
      }
    }
    self.journal.lock().push("flaky:ok".to_string());
    next.run(ctx).await
  }
}

struct Fixture {
  journal: Journal,
  registry: Arc<BehaviorRegistry>,
  factory: PipelineFactory,
}

fn fixture() -> Fixture {
  setup_tracing();
  let journal = new_journal();
  let registry = Arc::new(BehaviorRegistry::new());
  for name in ["a", "b", "c"] {
    let journal = Arc::clone(&journal);
    registry.register(name, move || RecordingBehavior::new(name, Arc::clone(&journal)));
  }
  let stop_journal = Arc::clone(&journal);
  registry.register("stop", move || StopBehavior::new("stop", Arc::clone(&stop_journal)));
  let fail_journal = Arc::clone(&journal);
  registry.register("fail", move || FailingBehavior::new("fail", "boom", Arc::clone(&fail_journal)));
  let factory = PipelineFactory::with_registry(Arc::clone(&registry));
  Fixture {
    journal,
    registry,
    factory,
  }
}

fn send_physical_ctx(registry: &Arc<BehaviorRegistry>) -> Arc<BehaviorContext> {
  let root = BehaviorContext::new_root(RegistryBuilder::root(Arc::clone(registry)));
  BehaviorContext::new_send_physical_message(root, SendOptions::default(), TransportMessage::new("m-1", Vec::new()), Vec::new())
}

fn chain_of(ids: &[&'static str]) -> BehaviorChain {
  let mut chain = BehaviorChain::new(Stage::SendPhysical);
  for id in ids {
    chain.add(*id);
  }
  chain
}

#[tokio::test]
async fn behaviors_run_in_append_order() {
  let fx = fixture();
  let ctx = send_physical_ctx(&fx.registry);

  let outcome = chain_of(&["a", "b", "c"]).invoke(&ctx, &fx.factory).await.unwrap();

  assert_eq!(outcome, ChainOutcome::Completed);
  assert_eq!(entries(&fx.journal), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn behavior_that_skips_next_short_circuits_the_rest() {
  let fx = fixture();
  let ctx = send_physical_ctx(&fx.registry);

  let outcome = chain_of(&["a", "stop", "c"]).invoke(&ctx, &fx.factory).await.unwrap();

  assert_eq!(outcome, ChainOutcome::ShortCircuited);
  assert_eq!(entries(&fx.journal), vec!["a", "stop"]);
}

#[tokio::test]
async fn behavior_error_aborts_the_chain_and_propagates() {
  let fx = fixture();
  let ctx = send_physical_ctx(&fx.registry);

  let err = chain_of(&["a", "fail", "c"]).invoke(&ctx, &fx.factory).await.unwrap_err();

  assert_eq!(behavior_error_message(&err).as_deref(), Some("boom"));
  assert_eq!(entries(&fx.journal), vec!["a", "fail"]);
}

#[tokio::test]
async fn duplicate_identifiers_run_once_per_occurrence() {
  let fx = fixture();
  let ctx = send_physical_ctx(&fx.registry);

  chain_of(&["a", "b", "a"]).invoke(&ctx, &fx.factory).await.unwrap();

  assert_eq!(entries(&fx.journal), vec!["a", "b", "a"]);
}

#[tokio::test]
async fn empty_chain_completes() {
  let fx = fixture();
  let ctx = send_physical_ctx(&fx.registry);

  let outcome = chain_of(&[]).invoke(&ctx, &fx.factory).await.unwrap();

  assert_eq!(outcome, ChainOutcome::Completed);
  assert!(entries(&fx.journal).is_empty());
}

#[tokio::test]
async fn code_around_next_wraps_the_inner_chain() {
  let fx = fixture();
  let journal = Arc::clone(&fx.journal);
  fx.registry.register("wrap", move || WrappingBehavior {
    name: "wrap",
    journal: Arc::clone(&journal),
  });
  let ctx = send_physical_ctx(&fx.registry);

  chain_of(&["wrap", "a", "b"]).invoke(&ctx, &fx.factory).await.unwrap();

  assert_eq!(entries(&fx.journal), vec!["wrap:before", "a", "b", "wrap:after"]);
}

#[tokio::test]
async fn after_code_runs_when_the_inner_chain_fails() {
  let fx = fixture();
  let journal = Arc::clone(&fx.journal);
  fx.registry.register("wrap", move || WrappingBehavior {
    name: "wrap",
    journal: Arc::clone(&journal),
  });
  let ctx = send_physical_ctx(&fx.registry);

  let result = chain_of(&["wrap", "fail"]).invoke(&ctx, &fx.factory).await;

  assert!(result.is_err());
  assert_eq!(entries(&fx.journal), vec!["wrap:before", "fail", "wrap:after"]);
}

#[tokio::test]
async fn next_can_be_invoked_again_to_retry() {
  let fx = fixture();
  fx.registry.register("retry", || RetryBehavior { attempts: 3 });
  fx.registry.register_shared(
    "flaky",
    Arc::new(FlakyBehavior {
      remaining_failures: parking_lot::Mutex::new(2),
      journal: Arc::clone(&fx.journal),
    }),
  );
  let ctx = send_physical_ctx(&fx.registry);

  let outcome = chain_of(&["retry", "flaky", "a"]).invoke(&ctx, &fx.factory).await.unwrap();

  assert_eq!(outcome, ChainOutcome::Completed);
  assert_eq!(entries(&fx.journal), vec!["flaky:failed", "flaky:failed", "flaky:ok", "a"]);
}

#[tokio::test]
async fn context_of_another_stage_is_rejected_before_any_behavior_runs() {
  let fx = fixture();
  let root = BehaviorContext::new_root(RegistryBuilder::root(Arc::clone(&fx.registry)));
  let physical = BehaviorContext::new_receive_physical(root, None);
  let logical = BehaviorContext::new_receive_logical(physical, LogicalMessage::new(OrderPlaced { order_id: 1 }));

  let err = chain_of(&["a"]).invoke(&logical, &fx.factory).await.unwrap_err();

  assert!(err.is_invalid_state());
  assert!(entries(&fx.journal).is_empty());
}

#[tokio::test]
async fn unregistered_behavior_fails_when_the_chain_reaches_it() {
  let fx = fixture();
  let ctx = send_physical_ctx(&fx.registry);

  let err = chain_of(&["a", "missing", "b"]).invoke(&ctx, &fx.factory).await.unwrap_err();

  assert!(matches!(err, PipelineError::BehaviorNotRegistered { ref behavior } if behavior == "missing"));
  assert_eq!(entries(&fx.journal), vec!["a"]);
}

#[tokio::test]
async fn next_exposes_the_remaining_identifiers() {
  let fx = fixture();
  let seen = Arc::new(parking_lot::Mutex::new(Vec::<BehaviorId>::new()));

  struct Inspect(Arc<parking_lot::Mutex<Vec<BehaviorId>>>);

  #[async_trait]
  impl Behavior for Inspect {
    async fn invoke(&self, ctx: &Arc<BehaviorContext>, next: Next<'_>) -> PipelineResult<()> {
      assert_eq!(next.stage(), Stage::SendPhysical);
      self.0.lock().extend(next.remaining().iter().cloned());
      next.run(ctx).await
    }
  }

  fx.registry.register_shared("inspect", Arc::new(Inspect(Arc::clone(&seen))));
  let ctx = send_physical_ctx(&fx.registry);

  chain_of(&["a", "inspect", "b", "c"]).invoke(&ctx, &fx.factory).await.unwrap();

  assert_eq!(*seen.lock(), vec![BehaviorId::from("b"), BehaviorId::from("c")]);
}
