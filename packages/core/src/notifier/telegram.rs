//! Telegram Bot API delivery.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::credentials::TelegramConfig;
use crate::notifier::{format_message, NotificationError, Notify};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

#[derive(Clone)]
pub struct TelegramNotifier {
    http: Client,
    api_url: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self, NotificationError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| NotificationError::Config(err.to_string()))?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: chat_id_for(&config.channel),
        })
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    async fn send_text(&self, text: &str) -> Result<(), NotificationError> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.bot_token);

        let response = self
            .http
            .post(&url)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
            })
            .send()
            .await
            // The URL embeds the bot token; keep it out of error messages.
            .map_err(|err| NotificationError::Transport {
                channel: "telegram",
                message: err.without_url().to_string(),
            })?;

        let status = response.status();
        let body = response.json::<ApiResponse>().await.ok();

        match body {
            Some(body) if status.is_success() && body.ok => Ok(()),
            Some(body) => Err(NotificationError::Rejected {
                channel: "telegram",
                message: body
                    .description
                    .unwrap_or_else(|| format!("HTTP {}", status)),
            }),
            None => Err(NotificationError::Rejected {
                channel: "telegram",
                message: format!("HTTP {}", status),
            }),
        }
    }
}

#[async_trait]
impl Notify for TelegramNotifier {
    fn channel(&self) -> &'static str {
        "telegram"
    }

    async fn notify(&self, site: &str, post_url: &str) -> Result<(), NotificationError> {
        self.send_text(&format_message(site, post_url)).await?;
        tracing::debug!(site = %site, post = %post_url, chat = %self.chat_id, "Telegram message sent");
        Ok(())
    }
}

/// Public channels are addressed as `@name`; numeric chat ids pass through.
fn chat_id_for(channel: &str) -> String {
    let channel = channel.trim();
    if channel.starts_with('@') || channel.parse::<i64>().is_ok() {
        channel.to_string()
    } else {
        format!("@{}", channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_channel_name_gets_at_prefix() {
        assert_eq!(chat_id_for("mychannel"), "@mychannel");
        assert_eq!(chat_id_for("@mychannel"), "@mychannel");
        assert_eq!(chat_id_for("-1001234567890"), "-1001234567890");
    }

    #[test]
    fn trailing_slash_in_api_url_is_dropped() {
        let notifier = TelegramNotifier::new(&TelegramConfig {
            channel: "news".to_string(),
            bot_token: "1:x".to_string(),
            api_url: "http://localhost:1234/".to_string(),
        })
        .unwrap();
        assert_eq!(notifier.api_url, "http://localhost:1234");
        assert_eq!(notifier.chat_id(), "@news");
    }
}
