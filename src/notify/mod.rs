//! Notification delivery
//!
//! The dispatcher hands every alert to a [`Notifier`]. The production
//! implementation talks to the Telegram Bot API; tests substitute a
//! recording fake. Rendering lives here so the delivery channel stays a
//! dumb pipe: an [`AlertEvent`] knows how to turn itself into the plain
//! text the user receives.

use std::error::Error;
use std::fmt;

use async_trait::async_trait;

use crate::evaluator::AlertKind;

pub mod telegram;

pub use telegram::TelegramNotifier;

pub type NotifyResult<T> = Result<T, NotifyError>;

/// Delivery failures, split by whether a retry could ever help.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The messenger endpoint could not be reached or answered 5xx.
    Unreachable(String),
    /// The recipient rejected delivery (blocked the bot, unknown chat).
    RecipientInvalid(String),
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::Unreachable(reason) => {
                write!(f, "messenger unreachable: {}", reason)
            }
            NotifyError::RecipientInvalid(reason) => {
                write!(f, "recipient rejected delivery: {}", reason)
            }
        }
    }
}

impl Error for NotifyError {}

/// Anything that can push a text message to a user.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `text` to the user identified by `recipient`.
    async fn send(&self, recipient: i64, text: &str) -> NotifyResult<()>;
}

/// Fallback notifier used when no messenger is configured. Alerts land
/// in the log instead of a chat.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipient: i64, text: &str) -> NotifyResult<()> {
        tracing::info!(recipient, "alert (no messenger configured): {text}");
        Ok(())
    }
}

/// One alert addressed to one user, ready for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub recipient: i64,
    pub panel_title: String,
    /// Display name of the VPS; absent for panel-level events.
    pub vps_name: Option<String>,
    pub ip: Option<String>,
    pub kind: AlertKind,
}

impl AlertEvent {
    /// Render the message text for this event.
    pub fn render(&self) -> String {
        let name = self.vps_name.as_deref().unwrap_or("unknown");

        match &self.kind {
            AlertKind::Breached { metric, level, pct } => {
                let mut text = format!(
                    "⚠️ {} {}\nVPS: {}",
                    metric.label(),
                    level.as_str().to_uppercase(),
                    name
                );
                self.push_ip(&mut text);
                text.push_str(&format!("\nUsage: {}%", pct));
                text
            }
            AlertKind::Resolved { metric, pct } => {
                let mut text = format!("✅ {} recovered\nVPS: {}", metric.label(), name);
                self.push_ip(&mut text);
                text.push_str(&format!("\nUsage: {}%", pct));
                text
            }
            AlertKind::Suspended => {
                let mut text = format!("⛔ VPS suspended:\n{}", name);
                self.push_ip(&mut text);
                text
            }
            AlertKind::Unsuspended => {
                let mut text = format!("✅ VPS unsuspended:\n{}", name);
                self.push_ip(&mut text);
                text
            }
            AlertKind::PanelUnreachable { reason } => {
                format!(
                    "⚠️ Panel unreachable: {}\n{}",
                    self.panel_title, reason
                )
            }
            AlertKind::PanelAuthFailed { reason } => {
                format!(
                    "⛔ Panel authentication failed: {}\n{}",
                    self.panel_title, reason
                )
            }
        }
    }

    fn push_ip(&self, text: &mut String) {
        if let Some(ip) = &self.ip {
            text.push_str(&format!("\nIP: {}", ip));
        }
    }
}
