//! Message types for actor communication
//!
//! Control messages travel over per-actor mpsc command channels;
//! request/response pairs carry a oneshot sender. Alert events flow
//! one way, monitor to dispatcher, wrapped in [`DispatcherCommand`].

use tokio::sync::oneshot;

use crate::notify::AlertEvent;

/// Commands accepted by the monitor scheduler
#[derive(Debug)]
pub enum MonitorCommand {
    /// Run a full sweep immediately and wait for it to finish
    ///
    /// Bypasses the interval timer. Used for tests and manual sweeps.
    TickNow {
        respond_to: oneshot::Sender<anyhow::Result<SweepStats>>,
    },

    /// Update the sweep interval
    ///
    /// Takes effect immediately; the running timer is replaced.
    UpdateInterval { interval_secs: u64 },

    /// Get counters accumulated since the scheduler started
    GetStats {
        respond_to: oneshot::Sender<MonitorStats>,
    },

    /// Gracefully shut down, aborting in-flight sweeps
    Shutdown,
}

/// Commands accepted by the dispatcher
#[derive(Debug)]
pub enum DispatcherCommand {
    /// Render and deliver one alert
    Deliver { event: AlertEvent },

    /// Shut down after draining queued alerts
    Shutdown,
}

/// Outcome of one sweep across all panels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Panels whose sweep ran to completion (successfully or not)
    pub panels_swept: usize,

    /// Panels skipped: owner disabled alerts or previous sweep still running
    pub panels_skipped: usize,

    /// Panels whose listing failed
    pub panels_failed: usize,

    /// VPS polled and evaluated
    pub vps_polled: usize,

    /// VPS skipped after a fetch or store failure
    pub vps_failed: usize,

    /// Alert events handed to the dispatcher
    pub events_emitted: usize,
}

/// Counters accumulated across the scheduler's lifetime
#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorStats {
    /// Sweeps started (timer ticks plus manual ticks)
    pub ticks: u64,

    pub panels_swept: u64,
    pub panels_skipped: u64,
    pub panels_failed: u64,
    pub vps_polled: u64,
    pub vps_failed: u64,
    pub events_emitted: u64,
}

impl MonitorStats {
    /// Fold one sweep into the lifetime counters.
    pub fn absorb(&mut self, sweep: &SweepStats) {
        self.panels_swept += sweep.panels_swept as u64;
        self.panels_skipped += sweep.panels_skipped as u64;
        self.panels_failed += sweep.panels_failed as u64;
        self.vps_polled += sweep.vps_polled as u64;
        self.vps_failed += sweep.vps_failed as u64;
        self.events_emitted += sweep.events_emitted as u64;
    }
}
