//! Backend registry: logical backend name → live backend instance.
//!
//! Filled once at startup, then read-mostly. Resolution takes a shared read
//! lock, so any number of concurrent loads can resolve in parallel.

use crate::backend::Backend;
use crate::error::{Result, WorldError};
use log::info;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct BackendRegistry {
    backends: RwLock<HashMap<String, Arc<dyn Backend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`. Fails if it is already bound; use [`Self::replace`] to
    /// rebind deliberately.
    pub fn register(&self, name: impl Into<String>, backend: Arc<dyn Backend>) -> Result<()> {
        let name = name.into();
        let mut backends = self.backends.write();
        if backends.contains_key(&name) {
            return Err(WorldError::illegal(format!(
                "backend '{}' is already registered",
                name
            )));
        }
        info!("Registered backend '{}'", name);
        backends.insert(name, backend);
        Ok(())
    }

    /// Bind `name`, returning whatever was bound before.
    pub fn replace(
        &self,
        name: impl Into<String>,
        backend: Arc<dyn Backend>,
    ) -> Option<Arc<dyn Backend>> {
        let name = name.into();
        info!("Replacing backend '{}'", name);
        self.backends.write().insert(name, backend)
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Backend>> {
        self.backends
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| WorldError::UnknownBackend {
                backend: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.read().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.read().keys().cloned().collect();
        names.sort();
        names
    }
}
