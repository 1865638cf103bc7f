//! Engine configuration
//!
//! [`EngineConfig`] controls how a run is scheduled. It can be built in code,
//! loaded from environment variables, or parsed from YAML:
//!
//! ```rust
//! use stagegraph_core::{EngineConfig, ScheduleMode};
//!
//! let config = EngineConfig::from_yaml_str(r#"
//! mode: concurrent
//! max_concurrency: 8
//! default_stage_timeout_ms: 2000
//! "#)?;
//!
//! assert_eq!(config.mode, ScheduleMode::Concurrent);
//! assert_eq!(config.max_concurrency, 8);
//! assert_eq!(config.max_steps, 10_000);
//! # Ok::<(), stagegraph_core::GraphError>(())
//! ```
//!
//! # Environment variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `{PREFIX}MODE` | `mode` (`sequential` / `concurrent`) |
//! | `{PREFIX}MAX_CONCURRENCY` | `max_concurrency` |
//! | `{PREFIX}STAGE_TIMEOUT_MS` | `default_stage_timeout_ms` |
//! | `{PREFIX}HOOK_TIMEOUT_MS` | `hook_timeout_ms` |
//! | `{PREFIX}MAX_STEPS` | `max_steps` |

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How ready stage invocations are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    /// One invocation at a time, strictly first-in-first-out
    ///
    /// Runs of the same graph and input produce identically ordered results.
    #[default]
    Sequential,

    /// Up to `max_concurrency` invocations on separate tasks
    ///
    /// A stage still has at most one invocation in flight unless it is
    /// parallel-safe. Only the multiset of results is stable across runs.
    Concurrent,
}

impl FromStr for ScheduleMode {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "concurrent" | "parallel" => Ok(Self::Concurrent),
            other => Err(GraphError::configuration(format!(
                "unknown schedule mode '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ScheduleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => f.write_str("sequential"),
            Self::Concurrent => f.write_str("concurrent"),
        }
    }
}

/// Scheduling limits and defaults for runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mode: ScheduleMode,

    /// In-flight invocation cap in concurrent mode
    pub max_concurrency: usize,

    /// Timeout for stages registered without their own
    pub default_stage_timeout_ms: Option<u64>,

    /// Upper bound on each observability hook call
    pub hook_timeout_ms: u64,

    /// Maximum invocations per run; guards against cyclic graphs that never drain
    pub max_steps: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::Sequential,
            max_concurrency: 4,
            default_stage_timeout_ms: None,
            hook_timeout_ms: 1_000,
            max_steps: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn sequential() -> Self {
        Self::default()
    }

    pub fn concurrent(max_concurrency: usize) -> Self {
        Self {
            mode: ScheduleMode::Concurrent,
            max_concurrency,
            ..Self::default()
        }
    }

    pub fn with_default_stage_timeout(mut self, timeout: Duration) -> Self {
        self.default_stage_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_hook_timeout(mut self, timeout: Duration) -> Self {
        self.hook_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(GraphError::configuration("max_concurrency must be at least 1"));
        }
        if self.max_steps == 0 {
            return Err(GraphError::configuration("max_steps must be at least 1"));
        }
        if self.hook_timeout_ms == 0 {
            return Err(GraphError::configuration("hook_timeout_ms must be non-zero"));
        }
        if self.default_stage_timeout_ms == Some(0) {
            return Err(GraphError::configuration(
                "default_stage_timeout_ms must be non-zero when set",
            ));
        }
        Ok(())
    }

    /// Defaults overlaid with whichever `{prefix}*` variables are set, then validated
    pub fn from_env(prefix: &str) -> Result<Self> {
        let mut config = Self::default();

        if let Some(mode) = get_env_parse(&format!("{}MODE", prefix))? {
            config.mode = mode;
        }
        if let Some(n) = get_env_parse(&format!("{}MAX_CONCURRENCY", prefix))? {
            config.max_concurrency = n;
        }
        if let Some(ms) = get_env_parse(&format!("{}STAGE_TIMEOUT_MS", prefix))? {
            config.default_stage_timeout_ms = Some(ms);
        }
        if let Some(ms) = get_env_parse(&format!("{}HOOK_TIMEOUT_MS", prefix))? {
            config.hook_timeout_ms = ms;
        }
        if let Some(n) = get_env_parse(&format!("{}MAX_STEPS", prefix))? {
            config.max_steps = n;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a YAML document; missing fields take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_stage_timeout(&self) -> Option<Duration> {
        self.default_stage_timeout_ms.map(Duration::from_millis)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }

    /// Invocations allowed in flight at once
    pub(crate) fn concurrency_limit(&self) -> usize {
        match self.mode {
            ScheduleMode::Sequential => 1,
            ScheduleMode::Concurrent => self.max_concurrency.max(1),
        }
    }
}

fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(GraphError::configuration(format!(
            "Environment variable {} contains invalid UTF-8",
            key
        ))),
    }
}

fn get_env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match get_env(key)? {
        Some(val) => val.trim().parse::<T>().map(Some).map_err(|e| {
            GraphError::configuration(format!(
                "Failed to parse environment variable {}: {}",
                key, e
            ))
        }),
        None => Ok(None),
    }
}
