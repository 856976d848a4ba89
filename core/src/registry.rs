// busline/src/registry.rs

//! Defines the `BehaviorRegistry`, an identifier-keyed table of behavior constructors,
//! and `RegistryBuilder`, the scoped resolver the pipeline resolves behaviors through.

use crate::core::behavior::{Behavior, BehaviorId};
use crate::error::{PipelineError, PipelineResult};

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{event, Level};

/// The resolver capability consumed by the pipeline.
///
/// Implementations resolve behavior instances by identifier within their scope, hand out
/// child scopes for per-message isolation, and free what a scope owns on `release`.
pub trait ObjectBuilder: Send + Sync {
  fn create_child_builder(&self) -> Arc<dyn ObjectBuilder>;

  fn build(&self, id: &BehaviorId) -> PipelineResult<Arc<dyn Behavior>>;

  fn release(&self);
}

type BehaviorConstructor = Arc<dyn Fn() -> Arc<dyn Behavior> + Send + Sync>;

/// Maps behavior identifiers to constructors. Shared read-only by all workers once populated.
pub struct BehaviorRegistry {
  constructors: RwLock<HashMap<BehaviorId, BehaviorConstructor>>,
}

impl BehaviorRegistry {
  pub fn new() -> Self {
    Self {
      constructors: RwLock::new(HashMap::new()),
    }
  }

  /// Registers a constructor; each resolution calls it again. Re-registering replaces.
  pub fn register<B, F>(&self, id: impl Into<BehaviorId>, constructor: F)
  where
    B: Behavior + 'static,
    F: Fn() -> B + Send + Sync + 'static,
  {
    let id = id.into();
    event!(Level::DEBUG, behavior = %id, behavior_type = %std::any::type_name::<B>(), "Registering behavior.");
    let constructor: BehaviorConstructor = Arc::new(move || Arc::new(constructor()) as Arc<dyn Behavior>);
    self.constructors.write().insert(id, constructor);
  }

  /// Registers one instance that every resolution returns.
  pub fn register_shared(&self, id: impl Into<BehaviorId>, instance: Arc<dyn Behavior>) {
    let id = id.into();
    event!(Level::DEBUG, behavior = %id, "Registering shared behavior instance.");
    self.constructors.write().insert(id, Arc::new(move || Arc::clone(&instance)));
  }

  pub fn is_registered(&self, id: &BehaviorId) -> bool {
    self.constructors.read().contains_key(id)
  }

  pub fn ids(&self) -> Vec<BehaviorId> {
    let mut ids: Vec<BehaviorId> = self.constructors.read().keys().cloned().collect();
    ids.sort();
    ids
  }

  pub fn create(&self, id: &BehaviorId) -> PipelineResult<Arc<dyn Behavior>> {
    // Clone the constructor out so user code never runs under the registry lock.
    let constructor = self.constructors.read().get(id).cloned().ok_or_else(|| {
      event!(Level::ERROR, behavior = %id, "No behavior registered for identifier.");
      PipelineError::BehaviorNotRegistered {
        behavior: id.to_string(),
      }
    })?;
    Ok(constructor())
  }
}

impl Default for BehaviorRegistry {
  fn default() -> Self {
    Self::new()
  }
}

/// `ObjectBuilder` backed by a `BehaviorRegistry`.
///
/// Child scopes keep every instance they built alive until `release`, after which
/// building from the scope fails with `ScopeReleased`. The root scope tracks nothing.
pub struct RegistryBuilder {
  registry: Arc<BehaviorRegistry>,
  depth: usize,
  owned: Mutex<Vec<Arc<dyn Behavior>>>,
  released: AtomicBool,
}

impl RegistryBuilder {
  pub fn root(registry: Arc<BehaviorRegistry>) -> Arc<Self> {
    Arc::new(Self {
      registry,
      depth: 0,
      owned: Mutex::new(Vec::new()),
      released: AtomicBool::new(false),
    })
  }

  pub fn registry(&self) -> &Arc<BehaviorRegistry> {
    &self.registry
  }

  /// 0 for the root scope, +1 per child level.
  pub fn depth(&self) -> usize {
    self.depth
  }

  pub fn is_released(&self) -> bool {
    self.released.load(Ordering::SeqCst)
  }

  /// Instances currently owned by this scope.
  pub fn owned_count(&self) -> usize {
    self.owned.lock().len()
  }

  /// Concrete form of `create_child_builder`.
  pub fn child(&self) -> Arc<RegistryBuilder> {
    Arc::new(RegistryBuilder {
      registry: Arc::clone(&self.registry),
      depth: self.depth + 1,
      owned: Mutex::new(Vec::new()),
      released: AtomicBool::new(false),
    })
  }
}

impl ObjectBuilder for RegistryBuilder {
  fn create_child_builder(&self) -> Arc<dyn ObjectBuilder> {
    self.child()
  }

  fn build(&self, id: &BehaviorId) -> PipelineResult<Arc<dyn Behavior>> {
    if self.is_released() {
      return Err(PipelineError::ScopeReleased);
    }
    let instance = self.registry.create(id)?;
    if self.depth > 0 {
      self.owned.lock().push(Arc::clone(&instance));
    }
    Ok(instance)
  }

  fn release(&self) {
    if self.released.swap(true, Ordering::SeqCst) {
      return;
    }
    let owned = std::mem::take(&mut *self.owned.lock());
    event!(Level::TRACE, scope_depth = self.depth, released_instances = owned.len(), "Builder scope released.");
  }
}
