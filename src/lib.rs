pub mod actors;
pub mod config;
pub mod evaluator;
pub mod notify;
pub mod panel;
pub mod storage;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies a monitored instance within a panel's namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VpsRef {
    pub panel_id: i64,
    pub vps_id: String,
}

impl VpsRef {
    pub fn new(panel_id: i64, vps_id: impl Into<String>) -> Self {
        Self {
            panel_id,
            vps_id: vps_id.into(),
        }
    }
}

impl fmt::Display for VpsRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.panel_id, self.vps_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Disk,
    Bandwidth,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::Disk, Metric::Bandwidth];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Disk => "disk",
            Metric::Bandwidth => "bandwidth",
        }
    }

    /// Human-readable label used in notification texts.
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Disk => "Disk",
            Metric::Bandwidth => "Bandwidth",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disk" => Ok(Metric::Disk),
            "bandwidth" => Ok(Metric::Bandwidth),
            other => Err(format!("unknown metric: {other}")),
        }
    }
}

/// Severity classification of a usage percentage against its thresholds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageLevel {
    #[default]
    None,
    Warn,
    Critical,
}

impl UsageLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageLevel::None => "none",
            UsageLevel::Warn => "warn",
            UsageLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for UsageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UsageLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(UsageLevel::None),
            "warn" => Ok(UsageLevel::Warn),
            "critical" => Ok(UsageLevel::Critical),
            other => Err(format!("unknown usage level: {other}")),
        }
    }
}

/// Used/total pair for one resource, in whatever unit the panel reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub used: f64,
    pub total: f64,
}

impl ResourceUsage {
    pub fn new(used: f64, total: f64) -> Self {
        Self { used, total }
    }

    /// Integer percentage, or `None` when the total is zero or unknown.
    pub fn percent(&self) -> Option<u32> {
        if self.total > 0.0 {
            Some((self.used / self.total * 100.0) as u32)
        } else {
            None
        }
    }
}

/// One poll result for a single VPS. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    pub vps_ref: VpsRef,
    pub timestamp: DateTime<Utc>,
    pub disk: ResourceUsage,
    pub bandwidth: ResourceUsage,
    pub suspended: bool,
    pub hostname: Option<String>,
    pub ip: Option<String>,
}

impl MetricReading {
    pub fn usage(&self, metric: Metric) -> ResourceUsage {
        match metric {
            Metric::Disk => self.disk,
            Metric::Bandwidth => self.bandwidth,
        }
    }

    pub fn display_name(&self) -> String {
        match &self.hostname {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("VPS {}", self.vps_ref.vps_id),
        }
    }
}

/// VPS entry returned by a panel listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpsSummary {
    pub vps_ref: VpsRef,
    pub hostname: Option<String>,
    pub ip: Option<String>,
}

/// Warn/critical percentage pair for one metric.
///
/// Valid pairs satisfy `0 < warn_pct < critical_pct <= 100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricThresholds {
    pub warn_pct: u8,
    pub critical_pct: u8,
}

impl MetricThresholds {
    pub fn new(warn_pct: u8, critical_pct: u8) -> Result<Self, InvalidThresholds> {
        let pair = Self {
            warn_pct,
            critical_pct,
        };
        pair.validate()?;
        Ok(pair)
    }

    pub fn validate(&self) -> Result<(), InvalidThresholds> {
        if self.warn_pct == 0 || self.warn_pct >= self.critical_pct || self.critical_pct > 100 {
            return Err(InvalidThresholds {
                warn_pct: self.warn_pct,
                critical_pct: self.critical_pct,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidThresholds {
    pub warn_pct: u8,
    pub critical_pct: u8,
}

impl fmt::Display for InvalidThresholds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid thresholds: warn {}% / critical {}% (need 0 < warn < critical <= 100)",
            self.warn_pct, self.critical_pct
        )
    }
}

impl std::error::Error for InvalidThresholds {}

/// Per-user alerting configuration. Applies to every VPS the user owns
/// unless a per-VPS override exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPolicy {
    pub user_id: i64,
    pub enabled: bool,
    pub disk: MetricThresholds,
    pub bandwidth: MetricThresholds,
    pub suspend_alerts: bool,
}

impl AlertPolicy {
    pub fn thresholds(&self, metric: Metric) -> MetricThresholds {
        match metric {
            Metric::Disk => self.disk,
            Metric::Bandwidth => self.bandwidth,
        }
    }
}

/// Registered panel account. Credentials are opaque secrets and never
/// appear in logs; `Debug` redacts them.
#[derive(Clone, PartialEq, Eq)]
pub struct PanelProfile {
    pub id: i64,
    pub owner_user_id: i64,
    pub title: String,
    pub base_url: String,
    pub api_key: String,
    pub api_pass: String,
    pub verify_tls: bool,
}

impl fmt::Debug for PanelProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanelProfile")
            .field("id", &self.id)
            .field("owner_user_id", &self.owner_user_id)
            .field("title", &self.title)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("api_pass", &"<redacted>")
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}

/// Durable per-(tuple, metric) alerting state. The only record that must
/// survive restarts; without it every restart re-alerts on standing
/// breaches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    pub vps_ref: VpsRef,
    pub metric: Metric,
    pub last_pct: u32,
    pub last_level: UsageLevel,
    pub last_suspended: bool,
    pub last_notified_at: Option<DateTime<Utc>>,
}

impl AlertState {
    /// State assumed for a tuple that has never been polled.
    pub fn initial(vps_ref: VpsRef, metric: Metric) -> Self {
        Self {
            vps_ref,
            metric,
            last_pct: 0,
            last_level: UsageLevel::None,
            last_suspended: false,
            last_notified_at: None,
        }
    }
}

/// One-shot power operations passed through to the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Start,
    Stop,
    Restart,
    #[serde(rename = "poweroff")]
    PowerOff,
}

impl PowerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerAction::Start => "start",
            PowerAction::Stop => "stop",
            PowerAction::Restart => "restart",
            PowerAction::PowerOff => "poweroff",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(PowerAction::Start),
            "stop" => Ok(PowerAction::Stop),
            "restart" => Ok(PowerAction::Restart),
            "poweroff" => Ok(PowerAction::PowerOff),
            other => Err(format!("unknown power action: {other}")),
        }
    }
}
