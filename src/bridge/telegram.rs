//! Chat notification senders
//!
//! `TelegramSender` posts to the Telegram bot API. `LogChatSender` writes
//! the notification to the log, for deployments without a chat bot.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::{BridgeError, ChatMessage, ChatSender};
use crate::ci::ChatConfig;

#[derive(Debug, Clone)]
pub struct TelegramSender {
    client: reqwest::Client,
    api_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramSender {
    pub fn new(
        api_url: impl Into<String>,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BridgeError::ConfigError(e.to_string()))?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        })
    }

    pub fn from_config(config: &ChatConfig) -> Result<Self, BridgeError> {
        Self::new(
            config.api_url.clone(),
            config.bot_token.clone(),
            config.chat_id.clone(),
        )
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.api_url.trim_end_matches('/'),
            self.bot_token
        )
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Render a notification as Telegram HTML
pub fn format_message(message: &ChatMessage) -> String {
    let mut lines = vec![format!("<b>{}</b>", escape_html(&message.text))];

    let fields = [
        ("Repository", &message.repo),
        ("Branch", &message.branch),
        ("Commit", &message.commit),
        ("Committer", &message.committer),
        ("Triggered by", &message.triggered_by),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            lines.push(format!("{}: <code>{}</code>", label, escape_html(value)));
        }
    }

    lines.push(format!("<a href=\"{}\">Details</a>", message.link));
    if let Some(bin_link) = &message.bin_link {
        lines.push(format!("<a href=\"{}\">Binary release</a>", bin_link));
    }

    lines.join("\n")
}

#[async_trait]
impl ChatSender for TelegramSender {
    async fn send(&self, message: &ChatMessage) -> Result<(), BridgeError> {
        let body = json!({
            "chat_id": self.chat_id,
            "text": format_message(message),
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });

        let response = self.client.post(self.endpoint()).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BridgeError::HttpError {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

/// Sender that only logs, used when no chat bot is configured
#[derive(Debug, Clone, Default)]
pub struct LogChatSender;

#[async_trait]
impl ChatSender for LogChatSender {
    async fn send(&self, message: &ChatMessage) -> Result<(), BridgeError> {
        info!(
            text = %message.text,
            link = %message.link,
            repo = message.repo.as_deref().unwrap_or("-"),
            branch = message.branch.as_deref().unwrap_or("-"),
            "Run notification"
        );
        Ok(())
    }
}
