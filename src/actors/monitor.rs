//! MonitorActor - sweeps panels and turns readings into alerts
//!
//! One actor owns the sweep timer for the whole process. Each tick it
//! enumerates the stored panel profiles and spawns one sweep task per
//! panel, bounded by a global semaphore. A panel whose previous sweep
//! is still running is skipped for the tick, so no VPS is ever polled
//! concurrently with itself.
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → list profiles → sweep task per panel → fetch + evaluate
//!     ↑              ↓ per VPS: persist each row, then queue its events
//!     └─── Commands (TickNow, UpdateInterval, GetStats, Shutdown)
//! ```
//!
//! Each metric row is persisted before the events that row backs are
//! queued, and the queue call does not await. A write failure
//! suppresses only events whose row was never written; those
//! transitions re-fire on a later sweep, which beats losing track of
//! what was already sent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{Mutex, Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval};
use tracing::{debug, error, instrument, trace, warn};

use crate::config::{Config, ThresholdDefaults};
use crate::evaluator::{AlertKind, PriorState, ResolvedPolicy, evaluate};
use crate::notify::AlertEvent;
use crate::panel::{PanelClient, PanelError};
use crate::storage::Store;
use crate::{AlertPolicy, AlertState, Metric, MetricReading, PanelProfile, VpsRef, VpsSummary};

use super::dispatcher::DispatcherHandle;
use super::messages::{MonitorCommand, MonitorStats, SweepStats};

/// Actor that schedules and runs monitoring sweeps
pub struct MonitorActor {
    command_rx: mpsc::Receiver<MonitorCommand>,

    /// Shared pieces handed to every sweep task
    ctx: SweepContext,

    /// Thresholds for users without a stored policy
    defaults: ThresholdDefaults,

    /// Current sweep interval
    interval_duration: Duration,

    /// In-flight sweep task per panel id
    running: HashMap<i64, JoinHandle<PanelSweep>>,

    /// Lifetime counters
    stats: MonitorStats,
}

/// Everything a sweep task needs, cheap to clone per panel.
#[derive(Clone)]
struct SweepContext {
    store: Arc<dyn Store>,
    panel: Arc<dyn PanelClient>,
    dispatcher: DispatcherHandle,

    /// Global bound on concurrently swept panels
    limiter: Arc<Semaphore>,

    /// Last notified failure per panel id, for rate limiting
    error_notified: Arc<Mutex<HashMap<i64, Instant>>>,
    error_cooldown: Duration,
}

/// Outcome of sweeping a single panel
#[derive(Debug, Default, Clone, Copy)]
struct PanelSweep {
    failed: bool,
    vps_polled: usize,
    vps_failed: usize,
    events_emitted: usize,
}

impl MonitorActor {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        panel: Arc<dyn PanelClient>,
        dispatcher: DispatcherHandle,
        command_rx: mpsc::Receiver<MonitorCommand>,
    ) -> Self {
        Self {
            command_rx,
            ctx: SweepContext {
                store,
                panel,
                dispatcher,
                limiter: Arc::new(Semaphore::new(config.max_concurrent_panels)),
                error_notified: Arc::new(Mutex::new(HashMap::new())),
                error_cooldown: Duration::from_secs(config.panel_error_cooldown_secs),
            },
            defaults: config.defaults.clone(),
            interval_duration: Duration::from_secs(config.check_interval_secs),
            running: HashMap::new(),
            stats: MonitorStats::default(),
        }
    }

    /// Run the actor's main loop
    ///
    /// Runs until a Shutdown command arrives or the command channel
    /// closes. The first sweep starts immediately.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting monitor actor");

        let mut ticker = interval(self.interval_duration);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.stats.ticks += 1;
                    if let Err(e) = self.start_sweep().await {
                        error!("sweep failed to start: {:#}", e);
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        MonitorCommand::TickNow { respond_to } => {
                            debug!("received TickNow command");
                            self.stats.ticks += 1;
                            let result = self.sweep_and_wait().await;
                            let _ = respond_to.send(result);
                        }

                        MonitorCommand::UpdateInterval { interval_secs } => {
                            // interval() panics on a zero duration
                            let interval_secs = interval_secs.max(1);
                            debug!("updating interval to {interval_secs}s");
                            self.interval_duration = Duration::from_secs(interval_secs);
                            ticker = interval(self.interval_duration);
                        }

                        MonitorCommand::GetStats { respond_to } => {
                            self.reap_finished().await;
                            let _ = respond_to.send(self.stats);
                        }

                        MonitorCommand::Shutdown => {
                            debug!("received shutdown command");
                            self.abort_running();
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    self.abort_running();
                    break;
                }
            }
        }

        debug!("monitor actor stopped");
    }

    /// Spawn sweep tasks for every eligible panel without waiting for
    /// them. Skips disabled owners and panels still being swept.
    async fn start_sweep(&mut self) -> Result<SweepStats> {
        self.reap_finished().await;

        let profiles = self
            .ctx
            .store
            .list_profiles()
            .await
            .context("failed to list panel profiles")?;

        trace!(count = profiles.len(), "starting sweep");

        // Panels deleted since the last sweep keep no cooldown entry
        self.ctx
            .error_notified
            .lock()
            .await
            .retain(|id, _| profiles.iter().any(|p| p.id == *id));

        let mut stats = SweepStats::default();
        let mut policies: HashMap<i64, AlertPolicy> = HashMap::new();

        for profile in profiles {
            let policy = match policies.get(&profile.owner_user_id) {
                Some(policy) => policy.clone(),
                None => {
                    let policy = self.load_policy(profile.owner_user_id).await;
                    policies.insert(profile.owner_user_id, policy.clone());
                    policy
                }
            };

            if !policy.enabled {
                trace!(panel = profile.id, "alerts disabled for owner, skipping");
                stats.panels_skipped += 1;
                continue;
            }

            if let Some(handle) = self.running.remove(&profile.id) {
                if handle.is_finished() {
                    self.absorb_handle(profile.id, handle).await;
                } else {
                    warn!(panel = profile.id, "previous sweep still running, skipping");
                    self.running.insert(profile.id, handle);
                    stats.panels_skipped += 1;
                    continue;
                }
            }

            let panel_id = profile.id;
            let task = sweep_panel(self.ctx.clone(), profile, policy);
            self.running.insert(panel_id, tokio::spawn(task));
        }

        self.stats.panels_skipped += stats.panels_skipped as u64;
        Ok(stats)
    }

    /// TickNow path: start a sweep, then wait for every in-flight panel
    /// (including leftovers from earlier ticks) and report the totals.
    async fn sweep_and_wait(&mut self) -> Result<SweepStats> {
        let mut totals = self.start_sweep().await?;

        for (panel_id, handle) in self.running.drain() {
            match handle.await {
                Ok(sweep) => {
                    fold_panel(&mut totals, &sweep);
                    self.stats.absorb(&panel_stats(&sweep));
                }
                Err(e) => {
                    error!(panel = panel_id, "sweep task failed: {e}");
                    totals.panels_failed += 1;
                    self.stats.panels_failed += 1;
                }
            }
        }

        Ok(totals)
    }

    /// Collect results of sweeps that finished since the last look.
    async fn reap_finished(&mut self) {
        let finished: Vec<i64> = self
            .running
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(panel_id, _)| *panel_id)
            .collect();

        for panel_id in finished {
            if let Some(handle) = self.running.remove(&panel_id) {
                self.absorb_handle(panel_id, handle).await;
            }
        }
    }

    async fn absorb_handle(&mut self, panel_id: i64, handle: JoinHandle<PanelSweep>) {
        match handle.await {
            Ok(sweep) => self.stats.absorb(&panel_stats(&sweep)),
            Err(e) => {
                error!(panel = panel_id, "sweep task failed: {e}");
                self.stats.panels_failed += 1;
            }
        }
    }

    fn abort_running(&mut self) {
        for (_, handle) in self.running.drain() {
            handle.abort();
        }
    }

    /// Stored policy for the user, or the configured defaults.
    async fn load_policy(&self, user_id: i64) -> AlertPolicy {
        match self.ctx.store.get_policy(user_id).await {
            Ok(Some(policy)) => policy,
            Ok(None) => self.defaults.policy_for(user_id),
            Err(err) => {
                warn!(user = user_id, "failed to load policy, using defaults: {err}");
                self.defaults.policy_for(user_id)
            }
        }
    }
}

fn panel_stats(sweep: &PanelSweep) -> SweepStats {
    let mut stats = SweepStats::default();
    fold_panel(&mut stats, sweep);
    stats
}

fn fold_panel(stats: &mut SweepStats, sweep: &PanelSweep) {
    stats.panels_swept += 1;
    if sweep.failed {
        stats.panels_failed += 1;
    }
    stats.vps_polled += sweep.vps_polled;
    stats.vps_failed += sweep.vps_failed;
    stats.events_emitted += sweep.events_emitted;
}

/// Sweep one panel: list its VPS, then poll each in turn.
///
/// A listing failure fails the whole panel and produces at most one
/// user-visible event per cooldown window. Per-VPS failures are logged
/// and skipped.
#[instrument(skip_all, fields(panel = profile.id))]
async fn sweep_panel(ctx: SweepContext, profile: PanelProfile, policy: AlertPolicy) -> PanelSweep {
    let mut sweep = PanelSweep::default();

    // The limiter is never closed; acquire can only fail if that changes
    let _permit = match ctx.limiter.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return sweep,
    };

    let summaries = match ctx.panel.list_vps(&profile).await {
        Ok(summaries) => summaries,
        Err(err) => {
            warn!("panel sweep failed: {err}");
            sweep.failed = true;
            report_panel_failure(&ctx, &profile, err).await;
            return sweep;
        }
    };

    debug!(count = summaries.len(), "sweeping panel");

    for summary in summaries {
        match poll_vps(&ctx, &profile, &policy, &summary, &mut sweep).await {
            Ok(()) => sweep.vps_polled += 1,
            Err(err) => {
                warn!(vps = %summary.vps_ref, "skipping vps after failure: {:#}", err);
                sweep.vps_failed += 1;
            }
        }
    }

    sweep
}

/// Poll one VPS, persist the outcome and queue the resulting alerts.
///
/// Each metric row is written before the events backed by that row are
/// queued, and the queue call does not await, so a failed or aborted
/// sweep never records a transition it did not announce. Queued events
/// stay counted on `sweep` even when a later write fails.
async fn poll_vps(
    ctx: &SweepContext,
    profile: &PanelProfile,
    policy: &AlertPolicy,
    summary: &VpsSummary,
    sweep: &mut PanelSweep,
) -> Result<()> {
    let vps_ref = &summary.vps_ref;

    let mut reading = ctx
        .panel
        .fetch_metrics(profile, vps_ref)
        .await
        .context("failed to fetch metrics")?;

    // The listing sometimes knows the name and ip when the detail
    // payload does not
    if reading.hostname.is_none() {
        reading.hostname = summary.hostname.clone();
    }
    if reading.ip.is_none() {
        reading.ip = summary.ip.clone();
    }

    let prior = PriorState {
        disk: load_state(ctx, vps_ref, Metric::Disk).await?,
        bandwidth: load_state(ctx, vps_ref, Metric::Bandwidth).await?,
    };

    let mut resolved = ResolvedPolicy::from(policy);
    for metric in Metric::ALL {
        if let Some(thresholds) = ctx
            .store
            .get_override(vps_ref, metric)
            .await
            .context("failed to load threshold override")?
        {
            resolved = resolved.with_override(metric, thresholds);
        }
    }

    let evaluation = evaluate(&reading, &resolved, &prior);

    ctx.store
        .put_state(&evaluation.disk)
        .await
        .context("failed to persist disk state")?;
    queue_events(
        ctx,
        profile,
        &reading,
        evaluation.events_for(Metric::Disk),
        sweep,
    );

    ctx.store
        .put_state(&evaluation.bandwidth)
        .await
        .context("failed to persist bandwidth state")?;
    queue_events(
        ctx,
        profile,
        &reading,
        evaluation.events_for(Metric::Bandwidth),
        sweep,
    );

    Ok(())
}

/// Queue events for one persisted row, counting them on the sweep.
fn queue_events(
    ctx: &SweepContext,
    profile: &PanelProfile,
    reading: &MetricReading,
    kinds: Vec<AlertKind>,
    sweep: &mut PanelSweep,
) {
    for kind in kinds {
        let event = AlertEvent {
            recipient: profile.owner_user_id,
            panel_title: profile.title.clone(),
            vps_name: Some(reading.display_name()),
            ip: reading.ip.clone(),
            kind,
        };
        if let Err(err) = ctx.dispatcher.queue(event) {
            error!("failed to queue alert: {:#}", err);
        }
        sweep.events_emitted += 1;
    }
}

async fn load_state(ctx: &SweepContext, vps_ref: &VpsRef, metric: Metric) -> Result<AlertState> {
    let state = ctx
        .store
        .get_state(vps_ref, metric)
        .await
        .context("failed to load alert state")?;
    Ok(state.unwrap_or_else(|| AlertState::initial(vps_ref.clone(), metric)))
}

/// Queue a panel-level failure event unless one went out recently.
async fn report_panel_failure(ctx: &SweepContext, profile: &PanelProfile, err: PanelError) {
    {
        let mut notified = ctx.error_notified.lock().await;
        let now = Instant::now();
        if let Some(last) = notified.get(&profile.id) {
            if now.duration_since(*last) < ctx.error_cooldown {
                debug!(panel = profile.id, "panel failure within cooldown, not notifying");
                return;
            }
        }
        notified.insert(profile.id, now);
    }

    let kind = match err {
        PanelError::Unauthorized(reason) => AlertKind::PanelAuthFailed { reason },
        PanelError::Unreachable(reason) => AlertKind::PanelUnreachable { reason },
        PanelError::MalformedResponse(reason) => AlertKind::PanelUnreachable { reason },
    };

    let event = AlertEvent {
        recipient: profile.owner_user_id,
        panel_title: profile.title.clone(),
        vps_name: None,
        ip: None,
        kind,
    };

    if let Err(err) = ctx.dispatcher.deliver(event).await {
        error!("failed to queue panel failure alert: {:#}", err);
    }
}

/// Handle for controlling a MonitorActor
///
/// Cloneable; all clones talk to the same actor.
#[derive(Clone)]
pub struct MonitorHandle {
    sender: mpsc::Sender<MonitorCommand>,
}

impl MonitorHandle {
    /// Spawn the scheduler as a tokio task and return its handle.
    pub fn spawn(
        config: &Config,
        store: Arc<dyn Store>,
        panel: Arc<dyn PanelClient>,
        dispatcher: DispatcherHandle,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = MonitorActor::new(config, store, panel, dispatcher, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a sweep immediately and wait for it to complete.
    pub async fn tick_now(&self) -> Result<SweepStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::TickNow { respond_to: tx })
            .await
            .context("failed to send TickNow command")?;

        rx.await.context("failed to receive response")?
    }

    /// Update the sweep interval.
    pub async fn update_interval(&self, interval_secs: u64) -> Result<()> {
        self.sender
            .send(MonitorCommand::UpdateInterval { interval_secs })
            .await
            .context("failed to send UpdateInterval command")?;
        Ok(())
    }

    /// Get counters accumulated since startup.
    pub async fn stats(&self) -> Result<MonitorStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MonitorCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive response")
    }

    /// Gracefully shut down the scheduler.
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(MonitorCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
