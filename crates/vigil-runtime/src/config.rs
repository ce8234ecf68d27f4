//! Process-wide runtime configuration.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;
use vigil_core::{Action, Result, VigilError};
use vigil_planner::PlannerConfig;

/// Environment variable naming a JSON config file.
pub const CONFIG_PATH_VAR: &str = "VIGIL_CONFIG";

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Default per-agent timeout in milliseconds.
    pub agent_timeout_ms: u64,

    /// Replans allowed per run before it fails terminally.
    pub max_replans: u32,

    /// Amount subtracted from a fallback action's priority while replanning.
    pub fallback_priority_boost: i64,

    /// Capacity of the live event channel.
    pub event_capacity: usize,

    /// Search limits.
    pub planner: PlannerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            agent_timeout_ms: 10_000,
            max_replans: 3,
            fallback_priority_boost: 10,
            event_capacity: 1024,
            planner: PlannerConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load from `VIGIL_CONFIG` (if set) and then apply `VIGIL_*` overrides.
    ///
    /// # Errors
    ///
    /// Returns `VigilError::Config` if a variable does not parse.
    pub fn from_env() -> Result<Self> {
        let base = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        base.with_overrides(|key| std::env::var(key).ok())
    }

    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text).map_err(|e| VigilError::Config {
            key: path.display().to_string(),
            message: e.to_string(),
        })?;
        info!("Loaded runtime config from {}", path.display());
        Ok(config)
    }

    /// Apply overrides from a variable lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = parse_var(&lookup, "VIGIL_AGENT_TIMEOUT_MS")? {
            self.agent_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "VIGIL_MAX_REPLANS")? {
            self.max_replans = v;
        }
        if let Some(v) = parse_var(&lookup, "VIGIL_FALLBACK_BOOST")? {
            self.fallback_priority_boost = v;
        }
        if let Some(v) = parse_var(&lookup, "VIGIL_EVENT_CAPACITY")? {
            self.event_capacity = v;
        }
        if let Some(v) = parse_var(&lookup, "VIGIL_MAX_STATES")? {
            self.planner.max_states_explored = v;
        }
        if let Some(v) = parse_var(&lookup, "VIGIL_MAX_PLAN_STEPS")? {
            self.planner.max_steps = v;
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.agent_timeout_ms == 0 {
            return Err(VigilError::Config {
                key: "agentTimeoutMs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.fallback_priority_boost < 0 {
            return Err(VigilError::Config {
                key: "fallbackPriorityBoost".to_string(),
                message: "must not be negative".to_string(),
            });
        }
        Ok(())
    }

    /// Timeout for an action: its own override, else the default.
    pub fn timeout_for(&self, action: &Action) -> Duration {
        Duration::from_millis(action.timeout_ms.unwrap_or(self.agent_timeout_ms))
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| VigilError::Config {
                key: key.to_string(),
                message: format!("{} ({:?})", e, raw),
            }),
    }
}
