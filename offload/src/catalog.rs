//! Named worker scripts that pools can be configured with.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use offload_api::errors::ConfigError;
use offload_api::script::WorkerScript;

lazy_static! {
    static ref GLOBAL_CATALOG: ScriptCatalog = ScriptCatalog::new();
}

/// Registry of entry scripts, keyed by name.
///
/// Cloning a catalog shares the underlying registrations.
#[derive(Clone, Default)]
pub struct ScriptCatalog {
    scripts: Arc<RwLock<HashMap<String, Arc<dyn WorkerScript>>>>,
}

impl ScriptCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide catalog used when a pool is built without one.
    pub fn global() -> &'static ScriptCatalog {
        &GLOBAL_CATALOG
    }

    /// Register `script` under `name`, replacing any previous registration.
    ///
    /// Pools that already resolved the old script keep running it.
    pub fn register(&self, name: impl Into<String>, script: impl WorkerScript) -> Result<(), ConfigError> {
        self.register_arc(name, Arc::new(script))
    }

    pub fn register_arc(&self, name: impl Into<String>, script: Arc<dyn WorkerScript>) -> Result<(), ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyScript);
        }
        let mut scripts = self.scripts.write().unwrap_or_else(|e| e.into_inner());
        if scripts.insert(name.clone(), script).is_some() {
            tracing::debug!(script = %name, "replaced registered script");
        }
        Ok(())
    }

    /// Builder-style registration.
    pub fn with_script(self, name: impl Into<String>, script: impl WorkerScript) -> Result<Self, ConfigError> {
        self.register(name, script)?;
        Ok(self)
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn WorkerScript>, ConfigError> {
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyScript);
        }
        let scripts = self.scripts.read().unwrap_or_else(|e| e.into_inner());
        scripts
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownScript(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        let scripts = self.scripts.read().unwrap_or_else(|e| e.into_inner());
        scripts.contains_key(name)
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut scripts = self.scripts.write().unwrap_or_else(|e| e.into_inner());
        scripts.remove(name).is_some()
    }

    pub fn names(&self) -> Vec<String> {
        let scripts = self.scripts.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = scripts.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ScriptCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptCatalog")
            .field("scripts", &self.names())
            .finish()
    }
}
