use thiserror::Error;

use crate::credentials::CredentialsError;
use crate::crawler::CrawlError;
use crate::notifier::NotificationError;
use crate::repository::StoreError;

/// Unified application error.
///
/// Every layer (config, store, crawl, notification) converts into this
/// type so the binary can fail in one predictable place.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Credentials(#[from] CredentialsError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crawl(#[from] CrawlError),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Json(#[from] serde_json::Error),
}
