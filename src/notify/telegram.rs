//! Telegram Bot API delivery

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{Notifier, NotifyError, NotifyResult};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends messages through `https://api.telegram.org/bot{token}/sendMessage`.
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[allow(dead_code)]
    ok: bool,
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_api_base(TELEGRAM_API_BASE, token)
    }

    /// Point the notifier at a different API host. Used by tests.
    pub fn with_api_base(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
            api_base: api_base.into(),
            token: token.into(),
        }
    }

    fn send_message_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.token)
    }
}

// The token is part of the request URL; keep it out of Debug output
impl fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("api_base", &self.api_base)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    #[instrument(skip(self, text), fields(recipient))]
    async fn send(&self, recipient: i64, text: &str) -> NotifyResult<()> {
        let request = SendMessageRequest {
            chat_id: recipient,
            text,
        };

        let response = self
            .client
            .post(self.send_message_url())
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                // without_url: the URL embeds the bot token
                NotifyError::Unreachable(err.without_url().to_string())
            })?;

        let status = response.status();
        if status.is_success() {
            debug!("message delivered");
            return Ok(());
        }

        let description = response
            .json::<ApiResponse>()
            .await
            .ok()
            .and_then(|body| body.description)
            .unwrap_or_else(|| format!("telegram returned {}", status));

        if is_recipient_error(&description) {
            Err(NotifyError::RecipientInvalid(description))
        } else {
            Err(NotifyError::Unreachable(description))
        }
    }
}

/// Telegram reports dead recipients in the error description rather
/// than a dedicated status code.
fn is_recipient_error(description: &str) -> bool {
    let lower = description.to_ascii_lowercase();
    ["chat not found", "blocked", "deactivated"]
        .iter()
        .any(|needle| lower.contains(needle))
}
