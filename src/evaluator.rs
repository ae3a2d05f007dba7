//! Pure threshold state machine.
//!
//! `evaluate` turns one poll result into updated per-metric alert state and
//! the notifications that state change implies. Decisions are edge-triggered:
//! an event fires only when a metric changes level or the suspension flag
//! flips, never while a condition merely persists between polls. The
//! function performs no I/O and derives timestamps from the reading, so a
//! given `(reading, policy, prior)` triple always produces the same output.

use crate::{
    AlertPolicy, AlertState, Metric, MetricReading, MetricThresholds, ResourceUsage, UsageLevel,
    VpsRef,
};

/// Everything a user can be notified about.
///
/// `evaluate` emits the usage and suspension variants; the scheduler emits
/// the panel-failure variants when a whole panel cannot be polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertKind {
    /// A metric entered `warn` or `critical` from a different level.
    Breached {
        metric: Metric,
        level: UsageLevel,
        pct: u32,
    },
    /// A previously breached metric returned below the warn threshold.
    Resolved { metric: Metric, pct: u32 },
    Suspended,
    Unsuspended,
    PanelUnreachable { reason: String },
    PanelAuthFailed { reason: String },
}

/// Thresholds in effect for one tuple after override resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedPolicy {
    pub disk: MetricThresholds,
    pub bandwidth: MetricThresholds,
    pub suspend_alerts: bool,
}

impl ResolvedPolicy {
    pub fn thresholds(&self, metric: Metric) -> MetricThresholds {
        match metric {
            Metric::Disk => self.disk,
            Metric::Bandwidth => self.bandwidth,
        }
    }

    pub fn with_override(mut self, metric: Metric, thresholds: MetricThresholds) -> Self {
        match metric {
            Metric::Disk => self.disk = thresholds,
            Metric::Bandwidth => self.bandwidth = thresholds,
        }
        self
    }
}

impl From<&AlertPolicy> for ResolvedPolicy {
    fn from(policy: &AlertPolicy) -> Self {
        Self {
            disk: policy.disk,
            bandwidth: policy.bandwidth,
            suspend_alerts: policy.suspend_alerts,
        }
    }
}

/// Stored state for one tuple, one row per metric.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorState {
    pub disk: AlertState,
    pub bandwidth: AlertState,
}

impl PriorState {
    /// State assumed before the first successful poll of a tuple.
    pub fn initial(vps_ref: &VpsRef) -> Self {
        Self {
            disk: AlertState::initial(vps_ref.clone(), Metric::Disk),
            bandwidth: AlertState::initial(vps_ref.clone(), Metric::Bandwidth),
        }
    }

    /// The suspension flag is tuple-scoped; the disk row is canonical.
    pub fn suspended(&self) -> bool {
        self.disk.last_suspended
    }
}

/// Outcome of evaluating one reading: replacement state rows plus the
/// events the transition implies, in emission order (disk, bandwidth,
/// suspension).
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub disk: AlertState,
    pub bandwidth: AlertState,
    pub events: Vec<AlertKind>,
}

impl Evaluation {
    /// Events whose dedup state lives on the given metric row, in
    /// emission order. Suspension events belong to the disk row, the
    /// canonical holder of the flag.
    pub fn events_for(&self, metric: Metric) -> Vec<AlertKind> {
        self.events
            .iter()
            .filter(|kind| match kind {
                AlertKind::Breached { metric: m, .. } | AlertKind::Resolved { metric: m, .. } => {
                    *m == metric
                }
                AlertKind::Suspended | AlertKind::Unsuspended => metric == Metric::Disk,
                AlertKind::PanelUnreachable { .. } | AlertKind::PanelAuthFailed { .. } => false,
            })
            .cloned()
            .collect()
    }
}

/// Classify a percentage against a threshold pair.
pub fn classify(pct: u32, thresholds: MetricThresholds) -> UsageLevel {
    if pct >= thresholds.critical_pct as u32 {
        UsageLevel::Critical
    } else if pct >= thresholds.warn_pct as u32 {
        UsageLevel::Warn
    } else {
        UsageLevel::None
    }
}

pub fn evaluate(reading: &MetricReading, policy: &ResolvedPolicy, prior: &PriorState) -> Evaluation {
    let mut events = Vec::new();

    let (disk_pct, disk_level, disk_event) =
        evaluate_usage(Metric::Disk, reading.disk, policy.disk, &prior.disk);
    let (bandwidth_pct, bandwidth_level, bandwidth_event) = evaluate_usage(
        Metric::Bandwidth,
        reading.bandwidth,
        policy.bandwidth,
        &prior.bandwidth,
    );

    events.extend(disk_event.clone());
    events.extend(bandwidth_event.clone());

    let suspension_event = match (prior.suspended(), reading.suspended) {
        (false, true) => Some(AlertKind::Suspended),
        (true, false) => Some(AlertKind::Unsuspended),
        _ => None,
    };
    let suspension_changed = suspension_event.is_some();
    if policy.suspend_alerts {
        events.extend(suspension_event);
    }

    // The suspension flag rides on both metric rows; a suspension event
    // refreshes last_notified_at on both so the rows stay in lockstep.
    let suspension_notified = suspension_changed && policy.suspend_alerts;

    let disk = AlertState {
        vps_ref: reading.vps_ref.clone(),
        metric: Metric::Disk,
        last_pct: disk_pct,
        last_level: disk_level,
        last_suspended: reading.suspended,
        last_notified_at: if disk_event.is_some() || suspension_notified {
            Some(reading.timestamp)
        } else {
            prior.disk.last_notified_at
        },
    };

    let bandwidth = AlertState {
        vps_ref: reading.vps_ref.clone(),
        metric: Metric::Bandwidth,
        last_pct: bandwidth_pct,
        last_level: bandwidth_level,
        last_suspended: reading.suspended,
        last_notified_at: if bandwidth_event.is_some() || suspension_notified {
            Some(reading.timestamp)
        } else {
            prior.bandwidth.last_notified_at
        },
    };

    Evaluation {
        disk,
        bandwidth,
        events,
    }
}

/// Per-metric step: new percentage, new level, and the implied event.
///
/// An unknown total fails closed: the percentage is recorded as 0, the
/// level drops to `none`, and no usage event is emitted for this poll. If
/// the total reappears while usage is still high, the next poll re-alerts;
/// a duplicate breach notice is preferred over a spurious "resolved".
fn evaluate_usage(
    metric: Metric,
    usage: ResourceUsage,
    thresholds: MetricThresholds,
    prior: &AlertState,
) -> (u32, UsageLevel, Option<AlertKind>) {
    let Some(pct) = usage.percent() else {
        return (0, UsageLevel::None, None);
    };

    let level = classify(pct, thresholds);
    if level == prior.last_level {
        return (pct, level, None);
    }

    let event = match level {
        UsageLevel::None => AlertKind::Resolved { metric, pct },
        UsageLevel::Warn | UsageLevel::Critical => AlertKind::Breached {
            metric,
            level,
            pct,
        },
    };

    (pct, level, Some(event))
}
