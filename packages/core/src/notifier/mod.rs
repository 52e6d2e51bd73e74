//! Notification delivery.
//!
//! The sync engine depends only on the [`Notify`] capability. The concrete
//! transport is one of a closed set, [`Notifier::Mail`] or
//! [`Notifier::Telegram`], picked once when the configuration is loaded.

pub mod mail;
pub mod telegram;

use async_trait::async_trait;
use thiserror::Error;

use crate::credentials::{Mode, NotifierConfig};

pub use mail::MailNotifier;
pub use telegram::TelegramNotifier;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("{channel} transport failed: {message}")]
    Transport {
        channel: &'static str,
        message: String,
    },

    #[error("{channel} rejected the notification: {message}")]
    Rejected {
        channel: &'static str,
        message: String,
    },

    #[error("notifier misconfigured: {0}")]
    Config(String),
}

/// The text sent for a new post.
pub fn format_message(site: &str, post_url: &str) -> String {
    format!("New blog post {} on blog {}", post_url, site)
}

/// Capability to tell the user about one new post.
///
/// Callers await the result before deciding what to log, so delivery is
/// synchronous from their point of view.
#[async_trait]
pub trait Notify: Send + Sync {
    /// Short channel name recorded in the notification log.
    fn channel(&self) -> &'static str;

    async fn notify(&self, site: &str, post_url: &str) -> Result<(), NotificationError>;
}

pub enum Notifier {
    Mail(MailNotifier),
    Telegram(TelegramNotifier),
}

impl Notifier {
    /// Build the transport selected by `config.mode`.
    pub fn from_config(config: &NotifierConfig) -> Result<Self, NotificationError> {
        match config.mode {
            Mode::Mail => Ok(Notifier::Mail(MailNotifier::new(&config.server, &config.client)?)),
            Mode::Telegram => Ok(Notifier::Telegram(TelegramNotifier::new(&config.telegram)?)),
        }
    }
}

#[async_trait]
impl Notify for Notifier {
    fn channel(&self) -> &'static str {
        match self {
            Notifier::Mail(inner) => inner.channel(),
            Notifier::Telegram(inner) => inner.channel(),
        }
    }

    async fn notify(&self, site: &str, post_url: &str) -> Result<(), NotificationError> {
        match self {
            Notifier::Mail(inner) => inner.notify(site, post_url).await,
            Notifier::Telegram(inner) => inner.notify(site, post_url).await,
        }
    }
}
