//! Shared pools keyed by configuration.
//!
//! Callers asking for the same script and size get clones of one running
//! pool instead of spawning a new set of threads each time.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use offload_api::errors::{ConfigError, PoolResult};
use offload_api::reporter::ErrorReporter;

use crate::catalog::ScriptCatalog;
use crate::pool::WorkerPool;

type PoolKey = (String, usize);

/// Cache of one `WorkerPool` per distinct `(script, pool_size)`.
#[derive(Default)]
pub struct PoolRegistry {
    pools: Mutex<HashMap<PoolKey, WorkerPool>>,
    catalog: Option<ScriptCatalog>,
    reporter: Option<Arc<dyn ErrorReporter>>,
}

impl PoolRegistry {
    /// Registry resolving scripts from the global catalog.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: &ScriptCatalog) -> Self {
        Self {
            catalog: Some(catalog.clone()),
            ..Default::default()
        }
    }

    /// Reporter handed to every pool this registry builds.
    pub fn error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// The cached pool for `(script, pool_size)`, built on first use.
    ///
    /// A cached pool that has begun shutting down is replaced.
    pub fn pool(&self, script: &str, pool_size: usize) -> Result<WorkerPool, ConfigError> {
        let key = (script.to_string(), pool_size);
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(pool) = pools.get(&key) {
            if !pool.is_shutting_down() {
                return Ok(pool.clone());
            }
            tracing::debug!(script, pool_size, "replacing cached pool that is shutting down");
        }

        let mut builder = WorkerPool::builder(script).pool_size(pool_size);
        if let Some(catalog) = &self.catalog {
            builder = builder.catalog(catalog);
        }
        if let Some(reporter) = &self.reporter {
            builder = builder.error_reporter(Arc::clone(reporter));
        }

        let pool = builder.build()?;
        pools.insert(key, pool.clone());
        Ok(pool)
    }

    /// Number of cached pools.
    pub fn len(&self) -> usize {
        self.pools.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Terminate and forget every cached pool.
    ///
    /// Pools shut down concurrently and every one is waited for even if
    /// another fails; the first failure is returned.
    pub async fn terminate_all(&self) -> PoolResult<()> {
        let pools: Vec<WorkerPool> = {
            let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
            pools.drain().map(|(_, pool)| pool).collect()
        };

        let outcomes = join_all(pools.iter().map(|pool| pool.terminate())).await;
        let mut first_error = None;
        for (pool, outcome) in pools.iter().zip(outcomes) {
            if let Err(err) = outcome {
                tracing::warn!(script = pool.script(), error = %err, "pool failed to terminate cleanly");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("PoolRegistry")
            .field("pools", &pools.keys().collect::<Vec<_>>())
            .finish()
    }
}
