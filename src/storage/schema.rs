//! Database row shapes and their domain conversions
//!
//! ## Design
//!
//! Rows mirror the SQLite column layout exactly: tag columns (`metric`,
//! `last_level`) hold lowercase strings, booleans are integers,
//! timestamps are Unix epoch milliseconds. Conversion back into the
//! domain types re-validates what the columns cannot express (known tag
//! values, threshold invariants), so a hand-edited database surfaces as
//! `InvalidRecord` instead of silently corrupt state.

use std::str::FromStr;

use chrono::DateTime;

use crate::{AlertPolicy, AlertState, Metric, MetricThresholds, UsageLevel, VpsRef};

use super::error::{StorageError, StorageResult};

/// One row of the `alert_state` table
///
/// Primary key is (panel_id, vps_id, metric); `put_state` is a full
/// replace of one row.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertStateRow {
    pub panel_id: i64,
    pub vps_id: String,
    pub metric: String,
    pub last_pct: i64,
    pub last_level: String,
    pub last_suspended: bool,
    pub last_notified_at: Option<i64>,
}

impl AlertStateRow {
    pub fn from_state(state: &AlertState) -> Self {
        Self {
            panel_id: state.vps_ref.panel_id,
            vps_id: state.vps_ref.vps_id.clone(),
            metric: state.metric.to_string(),
            last_pct: i64::from(state.last_pct),
            last_level: state.last_level.to_string(),
            last_suspended: state.last_suspended,
            last_notified_at: state.last_notified_at.map(|ts| ts.timestamp_millis()),
        }
    }

    /// Convert back into the domain type, validating the tag columns
    pub fn into_state(self) -> StorageResult<AlertState> {
        let metric = Metric::from_str(&self.metric).map_err(StorageError::InvalidRecord)?;
        let last_level =
            UsageLevel::from_str(&self.last_level).map_err(StorageError::InvalidRecord)?;

        Ok(AlertState {
            vps_ref: VpsRef::new(self.panel_id, self.vps_id),
            metric,
            last_pct: u32::try_from(self.last_pct).unwrap_or(0),
            last_level,
            last_suspended: self.last_suspended,
            last_notified_at: self
                .last_notified_at
                .and_then(DateTime::from_timestamp_millis),
        })
    }
}

/// One row of the `alert_policies` table
///
/// Thresholds are flattened into four integer columns so defaults can
/// live in the schema.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyRow {
    pub user_id: i64,
    pub enabled: bool,
    pub disk_warn_pct: i64,
    pub disk_critical_pct: i64,
    pub bandwidth_warn_pct: i64,
    pub bandwidth_critical_pct: i64,
    pub suspend_alerts: bool,
}

impl PolicyRow {
    pub fn from_policy(policy: &AlertPolicy) -> Self {
        Self {
            user_id: policy.user_id,
            enabled: policy.enabled,
            disk_warn_pct: i64::from(policy.disk.warn_pct),
            disk_critical_pct: i64::from(policy.disk.critical_pct),
            bandwidth_warn_pct: i64::from(policy.bandwidth.warn_pct),
            bandwidth_critical_pct: i64::from(policy.bandwidth.critical_pct),
            suspend_alerts: policy.suspend_alerts,
        }
    }

    /// Convert back into the domain type, re-checking the threshold
    /// invariant
    pub fn into_policy(self) -> StorageResult<AlertPolicy> {
        let disk = MetricThresholds::new(
            clamp_pct(self.disk_warn_pct),
            clamp_pct(self.disk_critical_pct),
        )?;
        let bandwidth = MetricThresholds::new(
            clamp_pct(self.bandwidth_warn_pct),
            clamp_pct(self.bandwidth_critical_pct),
        )?;

        Ok(AlertPolicy {
            user_id: self.user_id,
            enabled: self.enabled,
            disk,
            bandwidth,
            suspend_alerts: self.suspend_alerts,
        })
    }
}

/// One row of the `threshold_overrides` table, keyed like alert state
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideRow {
    pub panel_id: i64,
    pub vps_id: String,
    pub metric: String,
    pub warn_pct: i64,
    pub critical_pct: i64,
}

impl OverrideRow {
    pub fn into_thresholds(self) -> StorageResult<MetricThresholds> {
        Ok(MetricThresholds::new(
            clamp_pct(self.warn_pct),
            clamp_pct(self.critical_pct),
        )?)
    }
}

fn clamp_pct(value: i64) -> u8 {
    u8::try_from(value).unwrap_or(u8::MAX)
}
