//! Outbound chat messages.

use std::time::Duration;

use async_trait::async_trait;
use livetiming_types::LiveError;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

/// Public Telegram Bot API endpoint.
pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Something that can deliver a text message to a chat.
#[async_trait]
pub trait ChatSender: Send + Sync {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), LiveError>;
}

/// [`ChatSender`] backed by the Telegram Bot API `sendMessage` method.
pub struct TelegramSender {
    client: reqwest::Client,
    api_url: String,
    token: Zeroizing<String>,
}

impl std::fmt::Debug for TelegramSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSender")
            .field("api_url", &self.api_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramSender {
    /// Create a sender for the bot identified by `token`.
    ///
    /// # Errors
    ///
    /// Returns [`LiveError::Network`] if the HTTP client cannot be built.
    pub fn new(api_url: impl Into<String>, token: Zeroizing<String>, timeout: Duration) -> Result<Self, LiveError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LiveError::Network(e.to_string()))?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl ChatSender for TelegramSender {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), LiveError> {
        // The token is part of the path; keep it out of every error message.
        let url = Zeroizing::new(format!("{}/bot{}/sendMessage", self.api_url, self.token.as_str()));
        let response = self
            .client
            .post(url.as_str())
            .json(&SendMessage { chat_id, text })
            .send()
            .await
            .map_err(|e| LiveError::Network(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| LiveError::Network(e.without_url().to_string()))?;
        let reply: Option<ApiReply> = serde_json::from_slice(&body).ok();

        match reply {
            Some(ApiReply { ok: true, .. }) if status.is_success() => {
                debug!(chat = %chat_id, "chat message delivered");
                Ok(())
            }
            Some(ApiReply { description, .. }) => Err(LiveError::Chat(
                description.unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            )),
            None => Err(LiveError::Chat(format!("HTTP {} with unreadable reply", status.as_u16()))),
        }
    }
}
