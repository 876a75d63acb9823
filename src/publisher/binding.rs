//! Registry enforcing unique ports, paths and keys across bindings.

use crate::config::BindingConfig;
use crate::error::{BindingConflict, Result, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Active bindings, keyed by port.
pub struct BindingRegistry {
    bindings: Mutex<HashMap<String, BindingConfig>>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self {
            bindings: Mutex::new(HashMap::new()),
        }
    }

    /// Claim the port, path and key of `config`.
    pub fn register(&self, config: &BindingConfig) -> Result<()> {
        config.validate()?;

        let mut bindings = self.bindings.lock();
        if bindings.contains_key(&config.port) {
            return Err(StoreError::DuplicateBinding(BindingConflict::Port(
                config.port.clone(),
            )));
        }
        for existing in bindings.values() {
            if existing.path == config.path {
                return Err(StoreError::DuplicateBinding(BindingConflict::Path(
                    config.path.clone(),
                )));
            }
            if existing.key == config.key {
                return Err(StoreError::DuplicateBinding(BindingConflict::Key(
                    config.key.clone(),
                )));
            }
        }
        bindings.insert(config.port.clone(), config.clone());
        Ok(())
    }

    /// Release the binding on `port`. Returns whether it existed.
    pub fn release(&self, port: &str) -> bool {
        self.bindings.lock().remove(port).is_some()
    }

    pub fn get(&self, port: &str) -> Option<BindingConfig> {
        self.bindings.lock().get(port).cloned()
    }

    /// Copy of all active bindings.
    pub fn bindings(&self) -> Vec<BindingConfig> {
        self.bindings.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.lock().is_empty()
    }
}

impl Default for BindingRegistry {
    fn default() -> Self {
        Self::new()
    }
}
