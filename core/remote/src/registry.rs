//! Provider registry for resolving a remote client by name.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use tasksync_common::{Error, Result};

use crate::client::RemoteStore;
use crate::file::FileRemote;
use crate::memory::MemoryRemote;
use crate::offline::OfflineRemote;

/// Factory function type for creating remote clients.
pub type ProviderFactory = Box<dyn Fn(Value) -> Result<Arc<dyn RemoteStore>> + Send + Sync>;

/// Registry for remote provider factories.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a provider factory.
    ///
    /// # Errors
    /// - `Conflict` if `name` is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: ProviderFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::Conflict(format!(
                "Provider '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a provider by name and configuration.
    ///
    /// # Errors
    /// - `NotFound` for an unregistered name
    /// - Whatever the factory reports for an invalid configuration
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn RemoteStore>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Provider '{}' is not registered", name)))?;
        factory(config)
    }

    /// Registered provider names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a provider is registered.
    pub fn has_provider(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn file_provider(config: Value) -> Result<Arc<dyn RemoteStore>> {
    let root = config
        .get("root")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidInput("File provider requires 'root' path".to_string()))?;
    Ok(Arc::new(FileRemote::new(root)?))
}

/// Create a registry with the built-in providers: `memory`, `file`, `offline`.
pub fn create_default_registry() -> ProviderRegistry {
    let mut factories: HashMap<String, ProviderFactory> = HashMap::new();

    factories.insert(
        "memory".to_string(),
        Box::new(|_config| Ok(Arc::new(MemoryRemote::new()))),
    );
    factories.insert("file".to_string(), Box::new(file_provider));
    factories.insert(
        "offline".to_string(),
        Box::new(|_config| Ok(Arc::new(OfflineRemote))),
    );

    ProviderRegistry { factories }
}
