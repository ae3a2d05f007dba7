//! DispatcherActor - delivers rendered alerts to the messenger
//!
//! Sits between the monitor and the [`Notifier`] so slow or failing
//! deliveries never stall a sweep. Events queue on a bounded channel;
//! the actor renders each to text and sends it. Delivery failures are
//! logged and dropped, never retried here: the state machine already
//! persisted the transition, and at-least-once delivery is the
//! contract, not exactly-once.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, instrument, warn};

use crate::notify::{AlertEvent, Notifier, NotifyError};

use super::messages::DispatcherCommand;

/// Queue depth before `queue` fails and `deliver` applies backpressure
const QUEUE_SIZE: usize = 256;

pub struct DispatcherActor {
    notifier: Arc<dyn Notifier>,
    command_rx: mpsc::Receiver<DispatcherCommand>,
}

impl DispatcherActor {
    pub fn new(notifier: Arc<dyn Notifier>, command_rx: mpsc::Receiver<DispatcherCommand>) -> Self {
        Self {
            notifier,
            command_rx,
        }
    }

    /// Run the actor's main loop
    ///
    /// Exits on Shutdown or when every handle is dropped. Alerts queued
    /// before shutdown are still delivered.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting dispatcher actor");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                DispatcherCommand::Deliver { event } => {
                    self.deliver(event).await;
                }
                DispatcherCommand::Shutdown => {
                    debug!("received shutdown command");
                    self.drain().await;
                    break;
                }
            }
        }

        debug!("dispatcher actor stopped");
    }

    /// Deliver everything still queued at shutdown.
    async fn drain(&mut self) {
        while let Ok(cmd) = self.command_rx.try_recv() {
            if let DispatcherCommand::Deliver { event } = cmd {
                self.deliver(event).await;
            }
        }
    }

    #[instrument(skip(self, event), fields(recipient = event.recipient))]
    async fn deliver(&self, event: AlertEvent) {
        let text = event.render();

        match self.notifier.send(event.recipient, &text).await {
            Ok(()) => {
                debug!("alert delivered");
            }
            Err(NotifyError::RecipientInvalid(reason)) => {
                warn!("dropping alert, recipient rejected delivery: {reason}");
            }
            Err(NotifyError::Unreachable(reason)) => {
                error!("failed to deliver alert: {reason}");
            }
        }
    }
}

/// Handle for queueing alerts onto a DispatcherActor
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<DispatcherCommand>,
}

impl DispatcherHandle {
    /// Spawn the dispatcher as a tokio task and return its handle.
    pub fn spawn(notifier: Arc<dyn Notifier>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(QUEUE_SIZE);

        let actor = DispatcherActor::new(notifier, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Queue one alert for delivery.
    pub async fn deliver(&self, event: AlertEvent) -> Result<()> {
        self.sender
            .send(DispatcherCommand::Deliver { event })
            .await
            .context("failed to send Deliver command")?;
        Ok(())
    }

    /// Queue one alert without waiting.
    ///
    /// There is no await point, so a caller can pair the call with a
    /// just-completed state write. Fails when the queue is full or the
    /// actor is gone.
    pub fn queue(&self, event: AlertEvent) -> Result<()> {
        self.sender
            .try_send(DispatcherCommand::Deliver { event })
            .context("failed to queue Deliver command")?;
        Ok(())
    }

    /// Shut down after draining the queue.
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(DispatcherCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
