use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use moor_core::{ConfigSnapshot, RetryPolicy, StateLimits};
use serde::{Deserialize, Serialize};

use crate::EngineSettings;

pub const DEFAULT_CONFIG_PATH: &str = "~/.moor/moor.toml";
pub const DEFAULT_STATE_PATH: &str = "~/.moor/state.json";

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub state: StateConfig,
    pub runtime: RuntimeConfig,
    pub readiness: ReadinessConfig,
    pub retry: RetryConfig,
    pub batch: BatchConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StateConfig {
    pub path: String,
    pub history_limit: usize,
    pub recent_limit: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        let limits = StateLimits::default();
        Self { path: DEFAULT_STATE_PATH.to_string(), history_limit: limits.history_limit, recent_limit: limits.recent_limit }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub binary: String, // docker | podman | any docker-compatible CLI
    pub stop_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { binary: "docker".to_string(), stop_timeout_secs: 10 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReadinessConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timeout_secs: Option<u64>,
    pub poll_interval_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self { default_timeout_secs: None, poll_interval_ms: 1000 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let p = RetryPolicy::default();
        Self { max_attempts: p.max_attempts, backoff_ms: p.backoff.as_millis() as u64 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    pub parallelism: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { parallelism: 1 }
    }
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        Ok(cfg)
    }

    /// A missing file means defaults; an unreadable or malformed one is an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn default_config_path() -> PathBuf {
        PathBuf::from(shellexpand::tilde(DEFAULT_CONFIG_PATH).to_string())
    }

    pub fn state_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.state.path).to_string())
    }

    pub fn limits(&self) -> StateLimits {
        StateLimits { history_limit: self.state.history_limit.max(1), recent_limit: self.state.recent_limit.max(1) }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy { max_attempts: self.retry.max_attempts.max(1), backoff: Duration::from_millis(self.retry.backoff_ms) }
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            runtime: self.runtime.binary.clone(),
            default_readiness_timeout_secs: self.readiness.default_timeout_secs,
            history_limit: self.state.history_limit,
            recent_limit: self.state.recent_limit,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            limits: self.limits(),
            retry: self.retry_policy(),
            stop_timeout: Duration::from_secs(self.runtime.stop_timeout_secs),
            default_readiness_timeout: self.readiness.default_timeout_secs.filter(|s| *s > 0).map(Duration::from_secs),
            poll_interval: Duration::from_millis(self.readiness.poll_interval_ms.max(1)),
            parallelism: self.batch.parallelism.max(1),
        }
    }
}
