use std::path::PathBuf;

use tracing::trace;

use crate::MetricThresholds;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (alert state lost on restart)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./panelmon.db")
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Seconds between monitoring sweeps
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Upper bound on panels swept concurrently
    #[serde(default = "default_max_concurrent_panels")]
    pub max_concurrent_panels: usize,

    /// Seconds between repeated panel-failure notifications for one panel
    #[serde(default = "default_panel_error_cooldown")]
    pub panel_error_cooldown_secs: u64,

    /// Thresholds applied to users without a stored policy
    #[serde(default)]
    pub defaults: ThresholdDefaults,

    /// Telegram delivery settings (optional - events are logged when absent)
    pub telegram: Option<TelegramConfig>,

    /// Storage configuration (optional - defaults to sqlite)
    pub storage: Option<StorageConfig>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ThresholdDefaults {
    #[serde(default = "default_thresholds")]
    pub disk: MetricThresholds,

    #[serde(default = "default_thresholds")]
    pub bandwidth: MetricThresholds,

    #[serde(default = "default_suspend_alerts")]
    pub suspend_alerts: bool,
}

impl Default for ThresholdDefaults {
    fn default() -> Self {
        Self {
            disk: default_thresholds(),
            bandwidth: default_thresholds(),
            suspend_alerts: default_suspend_alerts(),
        }
    }
}

impl ThresholdDefaults {
    /// Policy assumed for a user without a stored row.
    pub fn policy_for(&self, user_id: i64) -> crate::AlertPolicy {
        crate::AlertPolicy {
            user_id,
            enabled: true,
            disk: self.disk,
            bandwidth: self.bandwidth,
            suspend_alerts: self.suspend_alerts,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TelegramConfig {
    /// Bot token; falls back to the BOT_TOKEN environment variable
    pub token: Option<String>,
}

impl TelegramConfig {
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var("BOT_TOKEN").ok())
            .filter(|token| !token.is_empty())
    }
}

fn default_check_interval() -> u64 {
    300
}

fn default_max_concurrent_panels() -> usize {
    4
}

fn default_panel_error_cooldown() -> u64 {
    1800
}

fn default_thresholds() -> MetricThresholds {
    MetricThresholds {
        warn_pct: 80,
        critical_pct: 100,
    }
}

fn default_suspend_alerts() -> bool {
    true
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|_| anyhow::anyhow!("Invalid configuration file provided!"))?;
    validate(&config)?;
    trace!("loaded config: {config:?}");
    Ok(config)
}

fn validate(config: &Config) -> anyhow::Result<()> {
    if config.check_interval_secs == 0 {
        anyhow::bail!("check_interval_secs must be at least 1");
    }
    if config.max_concurrent_panels == 0 {
        anyhow::bail!("max_concurrent_panels must be at least 1");
    }
    config.defaults.disk.validate()?;
    config.defaults.bandwidth.validate()?;
    Ok(())
}
