// busline/src/settings.rs

//! The process-wide settings store: defaults and overrides keyed by case-insensitive
//! strings, locked read-only once configuration is complete.

use crate::error::{PipelineError, PipelineResult};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{event, Level};

type SettingValue = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct Settings {
  defaults: RwLock<HashMap<String, SettingValue>>,
  overrides: RwLock<HashMap<String, SettingValue>>,
  locked: AtomicBool,
}

fn normalize(key: &str) -> String {
  key.to_lowercase()
}

fn feature_key(feature: &str) -> String {
  format!("Features.{feature}")
}

impl Settings {
  pub fn new() -> Self {
    Self::default()
  }

  fn ensure_write_enabled(&self, key: &str) -> PipelineResult<()> {
    if self.is_locked() {
      event!(Level::ERROR, key, "Attempt to change a locked setting.");
      return Err(PipelineError::ConfigurationLocked { key: key.to_string() });
    }
    Ok(())
  }

  pub fn set<T: Any + Send + Sync>(&self, key: &str, value: T) -> PipelineResult<()> {
    self.ensure_write_enabled(key)?;
    self.overrides.write().insert(normalize(key), Arc::new(value));
    Ok(())
  }

  pub fn set_default<T: Any + Send + Sync>(&self, key: &str, value: T) -> PipelineResult<()> {
    self.ensure_write_enabled(key)?;
    self.defaults.write().insert(normalize(key), Arc::new(value));
    Ok(())
  }

  fn lookup(&self, key: &str) -> Option<SettingValue> {
    let key = normalize(key);
    if let Some(value) = self.overrides.read().get(&key) {
      return Some(Arc::clone(value));
    }
    self.defaults.read().get(&key).cloned()
  }

  /// Override if present, otherwise default.
  pub fn get<T: Any + Send + Sync + Clone>(&self, key: &str) -> PipelineResult<T> {
    let value = self.lookup(key).ok_or_else(|| PipelineError::SettingNotFound { key: key.to_string() })?;
    value
      .downcast_ref::<T>()
      .cloned()
      .ok_or_else(|| PipelineError::SettingTypeMismatch {
        key: key.to_string(),
        expected: std::any::type_name::<T>().to_string(),
      })
  }

  /// `fallback` when the key is missing or holds another type.
  pub fn get_or<T: Any + Send + Sync + Clone>(&self, key: &str, fallback: T) -> T {
    self.get(key).unwrap_or(fallback)
  }

  pub fn get_or_default<T: Any + Send + Sync + Clone + Default>(&self, key: &str) -> T {
    self.get_or(key, T::default())
  }

  pub fn has_setting(&self, key: &str) -> bool {
    self.lookup(key).is_some()
  }

  /// Locks the settings; every later write fails with `ConfigurationLocked`.
  pub fn prevent_changes(&self) {
    self.locked.store(true, Ordering::SeqCst);
    event!(Level::DEBUG, "Settings locked.");
  }

  pub fn is_locked(&self) -> bool {
    self.locked.load(Ordering::SeqCst)
  }

  /// Unlocks and clears everything.
  pub fn reset(&self) {
    self.locked.store(false, Ordering::SeqCst);
    self.overrides.write().clear();
    self.defaults.write().clear();
  }

  // --- Feature toggles ---

  pub fn enable_feature(&self, feature: &str) -> PipelineResult<()> {
    self.set(&feature_key(feature), true)
  }

  /// Enables the feature unless it is explicitly disabled.
  pub fn enable_feature_by_default(&self, feature: &str) -> PipelineResult<()> {
    self.set_default(&feature_key(feature), true)
  }

  pub fn disable_feature(&self, feature: &str) -> PipelineResult<()> {
    self.set(&feature_key(feature), false)
  }

  pub fn is_feature_enabled(&self, feature: &str) -> bool {
    self.get_or_default::<bool>(&feature_key(feature))
  }
}

impl std::fmt::Debug for Settings {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Settings")
      .field("defaults", &self.defaults.read().len())
      .field("overrides", &self.overrides.read().len())
      .field("locked", &self.is_locked())
      .finish()
  }
}
