use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use offload_api::errors::ConfigError;
use serde::Deserialize;

pub const MIN_POOL_SIZE: usize = 1;
pub const MAX_POOL_SIZE: usize = 16;
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "offload-";

pub const ENV_SCRIPT: &str = "OFFLOAD_SCRIPT";
pub const ENV_POOL_SIZE: &str = "OFFLOAD_POOL_SIZE";
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "OFFLOAD_SHUTDOWN_TIMEOUT_MS";
pub const ENV_THREAD_PREFIX: &str = "OFFLOAD_THREAD_PREFIX";

// --- Pool Size ---

/// Number of worker units in a pool, always within `MIN_POOL_SIZE..=MAX_POOL_SIZE`.
///
/// Explicit values are validated and never clamped. Only the host-derived
/// default is bounded into the valid range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolSize(usize);

impl PoolSize {
    pub fn new(size: usize) -> Result<Self, ConfigError> {
        if (MIN_POOL_SIZE..=MAX_POOL_SIZE).contains(&size) {
            Ok(Self(size))
        } else {
            Err(out_of_range(size as i64))
        }
    }

    /// Host logical core count, bounded to the valid range.
    pub fn host_default() -> Self {
        Self(num_cpus::get().clamp(MIN_POOL_SIZE, MAX_POOL_SIZE))
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

fn out_of_range(size: i64) -> ConfigError {
    ConfigError::PoolSizeOutOfRange { size, min: MIN_POOL_SIZE, max: MAX_POOL_SIZE }
}

impl Default for PoolSize {
    fn default() -> Self {
        Self::host_default()
    }
}

impl fmt::Display for PoolSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<usize> for PoolSize {
    type Error = ConfigError;

    fn try_from(size: usize) -> Result<Self, Self::Error> {
        Self::new(size)
    }
}

impl TryFrom<i64> for PoolSize {
    type Error = ConfigError;

    fn try_from(size: i64) -> Result<Self, Self::Error> {
        usize::try_from(size).map_err(|_| out_of_range(size)).and_then(Self::new)
    }
}

impl TryFrom<f64> for PoolSize {
    type Error = ConfigError;

    fn try_from(size: f64) -> Result<Self, Self::Error> {
        if !size.is_finite() {
            return Err(ConfigError::InvalidPoolSize(size.to_string()));
        }
        if size.fract() != 0.0 {
            return Err(ConfigError::NonIntegerPoolSize(size.to_string()));
        }
        Self::try_from(size as i64)
    }
}

impl TryFrom<&serde_json::Value> for PoolSize {
    type Error = ConfigError;

    fn try_from(value: &serde_json::Value) -> Result<Self, Self::Error> {
        match value {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::try_from(i)
                } else if n.is_u64() {
                    Err(out_of_range(i64::MAX))
                } else {
                    Self::try_from(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => s.parse(),
            other => Err(ConfigError::InvalidPoolSize(other.to_string())),
        }
    }
}

impl FromStr for PoolSize {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(i) = trimmed.parse::<i64>() {
            return Self::try_from(i);
        }
        match trimmed.parse::<f64>() {
            Ok(f) => Self::try_from(f),
            Err(_) => Err(ConfigError::InvalidPoolSize(s.to_string())),
        }
    }
}

// --- Pool Configuration ---

/// Configuration for a `WorkerPool`.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Name of the entry script every unit runs.
    pub script: String,

    /// Target number of units.
    pub pool_size: PoolSize,

    /// Grace period for `terminate()`. `None` waits for every unit indefinitely.
    pub shutdown_timeout: Option<Duration>,

    /// Prefix for unit thread names.
    pub thread_name_prefix: String,

    /// Stack size of unit threads; the platform default when unset.
    pub stack_size: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            script: String::new(),
            pool_size: PoolSize::host_default(),
            shutdown_timeout: None,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            stack_size: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPoolConfig {
    script: String,
    #[serde(default)]
    pool_size: Option<serde_json::Value>,
    #[serde(default)]
    shutdown_timeout_ms: Option<u64>,
    #[serde(default)]
    thread_name_prefix: Option<String>,
    #[serde(default)]
    stack_size: Option<usize>,
}

impl PoolConfig {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            ..Default::default()
        }
    }

    /// Parse a JSON document such as `{"script": "resize", "pool_size": 4}`.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawPoolConfig = serde_json::from_str(json).map_err(|e| ConfigError::InvalidValue {
            key: "config".to_string(),
            reason: e.to_string(),
        })?;

        let pool_size = match raw.pool_size {
            Some(value) => PoolSize::try_from(&value)?,
            None => PoolSize::host_default(),
        };

        let config = Self {
            script: raw.script,
            pool_size,
            shutdown_timeout: raw.shutdown_timeout_ms.map(Duration::from_millis),
            thread_name_prefix: raw
                .thread_name_prefix
                .unwrap_or_else(|| DEFAULT_THREAD_NAME_PREFIX.to_string()),
            stack_size: raw.stack_size,
        };
        config.validate()?;
        Ok(config)
    }

    /// Read the configuration from `OFFLOAD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let script = env::var(ENV_SCRIPT).unwrap_or_default();

        let pool_size = match env::var(ENV_POOL_SIZE) {
            Ok(raw) => raw.parse()?,
            Err(_) => PoolSize::host_default(),
        };

        let shutdown_timeout = match env::var(ENV_SHUTDOWN_TIMEOUT_MS) {
            Ok(raw) => Some(Duration::from_millis(raw.trim().parse().map_err(|_| {
                ConfigError::InvalidValue {
                    key: ENV_SHUTDOWN_TIMEOUT_MS.to_string(),
                    reason: format!("expected milliseconds, got {:?}", raw),
                }
            })?)),
            Err(_) => None,
        };

        let thread_name_prefix = env::var(ENV_THREAD_PREFIX)
            .unwrap_or_else(|_| DEFAULT_THREAD_NAME_PREFIX.to_string());

        let config = Self {
            script,
            pool_size,
            shutdown_timeout,
            thread_name_prefix,
            stack_size: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check everything that does not need the script catalog.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.script.trim().is_empty() {
            return Err(ConfigError::EmptyScript);
        }
        if self.stack_size == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "stack_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
