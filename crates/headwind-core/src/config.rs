//! Configuration management for Headwind

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Pacing settings
    #[serde(default)]
    pub pacer: PacerConfig,

    /// Scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Commit batching settings
    #[serde(default)]
    pub commit: CommitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pacer: PacerConfig::default(),
            scheduler: SchedulerConfig::default(),
            commit: CommitConfig::default(),
        }
    }
}

/// Adaptive pacing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacerConfig {
    /// Fraction of each pool's limit held back as reserve (0.0-0.5)
    #[serde(default = "default_reserve_buffer_pct")]
    pub reserve_buffer_pct: f64,

    /// Floor for the computed inter-request delay (ms)
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Ceiling for the computed inter-request delay (ms)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Safety margin added to a forced wait's reset time (seconds)
    #[serde(default = "default_force_wait_margin_secs")]
    pub force_wait_margin_secs: u64,
}

impl PacerConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn force_wait_margin(&self) -> Duration {
        Duration::from_secs(self.force_wait_margin_secs)
    }
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            reserve_buffer_pct: default_reserve_buffer_pct(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            force_wait_margin_secs: default_force_wait_margin_secs(),
        }
    }
}

/// Scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum concurrently executing work items
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Retry budget per item for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff before the first retry (ms), doubled per attempt
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Backoff ceiling (ms)
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Ceiling on quota-exhaustion requeues per item, counted apart from
    /// the retry budget
    #[serde(default = "default_max_quota_requeues")]
    pub max_quota_requeues: u32,

    /// How long idle workers sleep before re-polling the queue (ms)
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

impl SchedulerConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    /// Backoff before retry number `attempt` (1-based): base doubled per
    /// attempt, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self.backoff_base_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(ms.min(self.backoff_cap_ms))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            max_quota_requeues: default_max_quota_requeues(),
            idle_poll_ms: default_idle_poll_ms(),
        }
    }
}

/// Commit batching settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitConfig {
    /// Successes buffered before an automatic commit; also the most work
    /// a late failure can lose
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

// Default value functions
fn default_reserve_buffer_pct() -> f64 {
    0.10
}

fn default_min_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_force_wait_margin_secs() -> u64 {
    5
}

fn default_max_concurrent() -> usize {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    2_000
}

fn default_backoff_cap_ms() -> u64 {
    60_000
}

fn default_max_quota_requeues() -> u32 {
    10
}

fn default_idle_poll_ms() -> u64 {
    50
}

fn default_batch_size() -> usize {
    25
}

/// Get the config directory (XDG: ~/.config/headwind)
fn get_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(crate::APP_NAME)
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = get_config_dir().join("config.toml");
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&contents)?;
            info!("Loaded configuration from {:?}", path);
            config
        } else {
            info!("No config file found at {:?}, using defaults", path);
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, contents)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Check all fields against their allowed ranges
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=0.5).contains(&self.pacer.reserve_buffer_pct) {
            return Err(Error::InvalidConfig {
                field: "pacer.reserve_buffer_pct".into(),
                reason: "must be between 0.0 and 0.5".into(),
            });
        }
        if self.pacer.min_delay_ms >= self.pacer.max_delay_ms {
            return Err(Error::InvalidConfig {
                field: "pacer.min_delay_ms".into(),
                reason: "must be less than max_delay_ms".into(),
            });
        }
        if self.scheduler.max_concurrent == 0 {
            return Err(Error::InvalidConfig {
                field: "scheduler.max_concurrent".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.scheduler.backoff_base_ms == 0 {
            return Err(Error::InvalidConfig {
                field: "scheduler.backoff_base_ms".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.commit.batch_size == 0 {
            return Err(Error::InvalidConfig {
                field: "commit.batch_size".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}
