//! Watchlist persistence.
//!
//! All SQLite read/write logic lives here. Every method is a single
//! statement (or a single transaction), so each call is atomic on its own;
//! serialising calls for the *same* site is the sync engine's job.
//!
//! Timestamps are stored as RFC 3339 strings with microsecond precision.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

/// Upper bound for history queries.
pub const MAX_HISTORY_LIMIT: i64 = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} is already on the watchlist")]
    AlreadyWatched(String),

    #[error("{0} is not on the watchlist")]
    NotWatched(String),

    #[error("post {url} is already recorded for {site}")]
    DuplicatePost { site: String, url: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A root URL under observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchedSite {
    pub root_url: String,
    /// Informational pointer to a recently discovered post; starts out as
    /// the root URL itself. Never used to decide what is new.
    pub last_link: String,
    pub added_at: DateTime<Utc>,
}

/// A post recorded for a site. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub site: String,
    pub url: String,
    pub discovered_at: DateTime<Utc>,
}

/// One delivery attempt for one post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Option<i64>,
    pub site: String,
    pub post_url: String,
    pub channel: String,
    pub message: String,
    pub delivered: bool,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Repository for the watchlist, its posts and the notification log.
#[derive(Clone)]
pub struct WatchlistRepository {
    pool: SqlitePool,
}

impl WatchlistRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ---- Sites ----

    /// Start watching `root_url`. The last-seen marker starts at the root.
    pub async fn add_site(&self, root_url: &str) -> Result<WatchedSite, StoreError> {
        let added_at = Utc::now();

        sqlx::query("INSERT INTO blogs (site, last_link, added_at) VALUES (?, ?, ?)")
            .bind(root_url)
            .bind(root_url)
            .bind(timestamp(&added_at))
            .execute(&self.pool)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::AlreadyWatched(root_url.to_string())
                } else {
                    StoreError::Database(err)
                }
            })?;

        Ok(WatchedSite {
            root_url: root_url.to_string(),
            last_link: root_url.to_string(),
            added_at,
        })
    }

    /// Stop watching `root_url`. Its posts and notification log go with it.
    pub async fn remove_site(&self, root_url: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM blogs WHERE site = ?")
            .bind(root_url)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotWatched(root_url.to_string()));
        }
        Ok(())
    }

    /// All watched sites, oldest first.
    pub async fn list_sites(&self) -> Result<Vec<WatchedSite>, StoreError> {
        let rows = sqlx::query(
            "SELECT site, last_link, added_at FROM blogs ORDER BY added_at ASC, site ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let sites = rows
            .iter()
            .map(site_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sites)
    }

    pub async fn get_site(&self, root_url: &str) -> Result<WatchedSite, StoreError> {
        let row = sqlx::query("SELECT site, last_link, added_at FROM blogs WHERE site = ?")
            .bind(root_url)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(site_from_row(&row)?),
            None => Err(StoreError::NotWatched(root_url.to_string())),
        }
    }

    /// Point the informational last-seen marker at `post_url`.
    pub async fn update_last_link(&self, root_url: &str, post_url: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE blogs SET last_link = ? WHERE site = ?")
            .bind(post_url)
            .bind(root_url)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotWatched(root_url.to_string()));
        }
        Ok(())
    }

    // ---- Posts ----

    /// URLs of every post recorded for `root_url`, in discovery order.
    pub async fn known_posts(&self, root_url: &str) -> Result<Vec<String>, StoreError> {
        let links = sqlx::query_scalar("SELECT link FROM posts WHERE site = ? ORDER BY rowid ASC")
            .bind(root_url)
            .fetch_all(&self.pool)
            .await?;
        Ok(links)
    }

    /// Full post records for `root_url`, in discovery order.
    pub async fn posts_for_site(&self, root_url: &str) -> Result<Vec<Post>, StoreError> {
        let rows = sqlx::query(
            "SELECT site, link, discovered_at FROM posts WHERE site = ? ORDER BY rowid ASC",
        )
        .bind(root_url)
        .fetch_all(&self.pool)
        .await?;

        let posts = rows
            .iter()
            .map(post_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(posts)
    }

    /// Record a newly discovered post.
    ///
    /// The `(site, url)` pair is unique: recording it twice is a
    /// [`StoreError::DuplicatePost`], recording it for a site that is not
    /// watched is [`StoreError::NotWatched`].
    pub async fn add_post(&self, root_url: &str, post_url: &str) -> Result<Post, StoreError> {
        let discovered_at = Utc::now();

        sqlx::query("INSERT INTO posts (site, link, discovered_at) VALUES (?, ?, ?)")
            .bind(root_url)
            .bind(post_url)
            .bind(timestamp(&discovered_at))
            .execute(&self.pool)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::DuplicatePost {
                        site: root_url.to_string(),
                        url: post_url.to_string(),
                    }
                } else if is_foreign_key_violation(&err) {
                    StoreError::NotWatched(root_url.to_string())
                } else {
                    StoreError::Database(err)
                }
            })?;

        Ok(Post {
            site: root_url.to_string(),
            url: post_url.to_string(),
            discovered_at,
        })
    }

    // ---- Notification log ----

    /// Log a delivery attempt (success or failure). Returns the new row id.
    pub async fn log_notification(&self, record: &NotificationRecord) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO notifications
             (site, link, channel, message, delivered, error, sent_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.site)
        .bind(&record.post_url)
        .bind(&record.channel)
        .bind(&record.message)
        .bind(record.delivered)
        .bind(&record.error)
        .bind(timestamp(&record.sent_at))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Most recent notification records first, optionally filtered.
    /// `limit` is clamped to `1..=MAX_HISTORY_LIMIT`.
    pub async fn notification_history(
        &self,
        site_filter: Option<&str>,
        limit: i64,
        failed_only: bool,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);

        let mut conditions = vec!["1=1"];
        if site_filter.is_some() {
            conditions.push("site = ?");
        }
        if failed_only {
            conditions.push("delivered = 0");
        }

        let sql = format!(
            "SELECT id, site, link, channel, message, delivered, error, sent_at
             FROM notifications
             WHERE {}
             ORDER BY id DESC
             LIMIT ?",
            conditions.join(" AND ")
        );

        let mut query = sqlx::query(&sql);
        if let Some(site) = site_filter {
            query = query.bind(site);
        }
        let rows = query.bind(limit).fetch_all(&self.pool).await?;

        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// The latest attempt for every post whose attempts have all failed,
    /// oldest first.
    pub async fn undelivered_notifications(&self) -> Result<Vec<NotificationRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, site, link, channel, message, delivered, error, sent_at
             FROM notifications
             WHERE id IN (
                 SELECT MAX(id) FROM notifications
                 GROUP BY site, link
                 HAVING MAX(delivered) = 0
             )
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

fn site_from_row(row: &SqliteRow) -> Result<WatchedSite, sqlx::Error> {
    Ok(WatchedSite {
        root_url: row.try_get("site")?,
        last_link: row.try_get("last_link")?,
        added_at: parse_timestamp(row, "added_at")?,
    })
}

fn post_from_row(row: &SqliteRow) -> Result<Post, sqlx::Error> {
    Ok(Post {
        site: row.try_get("site")?,
        url: row.try_get("link")?,
        discovered_at: parse_timestamp(row, "discovered_at")?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<NotificationRecord, sqlx::Error> {
    Ok(NotificationRecord {
        id: Some(row.try_get("id")?),
        site: row.try_get("site")?,
        post_url: row.try_get("link")?,
        channel: row.try_get("channel")?,
        message: row.try_get("message")?,
        delivered: row.try_get("delivered")?,
        error: row.try_get("error")?,
        sent_at: parse_timestamp(row, "sent_at")?,
    })
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| sqlx::Error::Decode(Box::new(err)))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;

    async fn make_repo() -> WatchlistRepository {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        WatchlistRepository::new(pool)
    }

    #[tokio::test]
    async fn added_site_starts_with_root_as_last_link() {
        let repo = make_repo().await;
        repo.add_site("http://blog.example.com/").await.unwrap();

        let sites = repo.list_sites().await.unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].root_url, "http://blog.example.com/");
        assert_eq!(sites[0].last_link, "http://blog.example.com/");
    }

    #[tokio::test]
    async fn adding_same_site_twice_is_rejected() {
        let repo = make_repo().await;
        repo.add_site("http://a/").await.unwrap();

        let err = repo.add_site("http://a/").await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyWatched(ref url) if url == "http://a/"));
        assert_eq!(repo.list_sites().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn removing_unknown_site_is_rejected() {
        let repo = make_repo().await;
        let err = repo.remove_site("http://nope/").await.unwrap_err();
        assert!(matches!(err, StoreError::NotWatched(_)));
    }

    #[tokio::test]
    async fn remove_site_drops_it_and_its_posts() {
        let repo = make_repo().await;
        repo.add_site("http://a/").await.unwrap();
        repo.add_site("http://b/").await.unwrap();
        repo.add_post("http://a/", "http://a/1").await.unwrap();

        repo.remove_site("http://a/").await.unwrap();

        let sites = repo.list_sites().await.unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].root_url, "http://b/");
        assert!(repo.known_posts("http://a/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn posts_are_listed_in_discovery_order() {
        let repo = make_repo().await;
        repo.add_site("http://a/").await.unwrap();
        for url in ["http://a/3", "http://a/1", "http://a/2"] {
            repo.add_post("http://a/", url).await.unwrap();
        }

        assert_eq!(
            repo.known_posts("http://a/").await.unwrap(),
            vec!["http://a/3", "http://a/1", "http://a/2"]
        );
        let posts = repo.posts_for_site("http://a/").await.unwrap();
        assert_eq!(posts.len(), 3);
        assert_eq!(posts[0].site, "http://a/");
    }

    #[tokio::test]
    async fn duplicate_post_is_rejected() {
        let repo = make_repo().await;
        repo.add_site("http://a/").await.unwrap();
        repo.add_post("http://a/", "http://a/1").await.unwrap();

        let err = repo.add_post("http://a/", "http://a/1").await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicatePost { .. }));
        assert_eq!(repo.known_posts("http://a/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_post_url_may_belong_to_two_sites() {
        let repo = make_repo().await;
        repo.add_site("http://a/").await.unwrap();
        repo.add_site("http://b/").await.unwrap();

        repo.add_post("http://a/", "http://shared/1").await.unwrap();
        repo.add_post("http://b/", "http://shared/1").await.unwrap();
    }

    #[tokio::test]
    async fn post_for_unwatched_site_is_rejected() {
        let repo = make_repo().await;
        let err = repo.add_post("http://ghost/", "http://ghost/1").await.unwrap_err();
        assert!(matches!(err, StoreError::NotWatched(_)));
    }

    #[tokio::test]
    async fn update_last_link_changes_marker() {
        let repo = make_repo().await;
        repo.add_site("http://a/").await.unwrap();
        repo.update_last_link("http://a/", "http://a/9").await.unwrap();

        assert_eq!(repo.get_site("http://a/").await.unwrap().last_link, "http://a/9");
    }

    #[tokio::test]
    async fn update_last_link_of_unknown_site_is_rejected() {
        let repo = make_repo().await;
        let err = repo.update_last_link("http://nope/", "x").await.unwrap_err();
        assert!(matches!(err, StoreError::NotWatched(_)));
    }

    fn make_record(post_url: &str, delivered: bool) -> NotificationRecord {
        NotificationRecord {
            id: None,
            site: "http://a/".to_string(),
            post_url: post_url.to_string(),
            channel: "mail".to_string(),
            message: format!("New blog post {} on blog http://a/", post_url),
            delivered,
            error: (!delivered).then(|| "smtp down".to_string()),
            sent_at: Utc::now(),
        }
    }

    async fn repo_with_posts(posts: &[&str]) -> WatchlistRepository {
        let repo = make_repo().await;
        repo.add_site("http://a/").await.unwrap();
        for post in posts {
            repo.add_post("http://a/", post).await.unwrap();
        }
        repo
    }

    #[tokio::test]
    async fn logged_notifications_come_back_newest_first() {
        let repo = repo_with_posts(&["http://a/1", "http://a/2"]).await;
        repo.log_notification(&make_record("http://a/1", true)).await.unwrap();
        repo.log_notification(&make_record("http://a/2", false)).await.unwrap();

        let history = repo.notification_history(None, 10, false).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].post_url, "http://a/2");
        assert!(!history[0].delivered);
        assert_eq!(history[0].error.as_deref(), Some("smtp down"));
        assert!(history[1].id.unwrap() > 0);

        let failed = repo.notification_history(Some("http://a/"), 10, true).await.unwrap();
        assert_eq!(failed.len(), 1);

        let other_site = repo.notification_history(Some("http://b/"), 10, false).await.unwrap();
        assert!(other_site.is_empty());
    }

    #[tokio::test]
    async fn undelivered_only_lists_posts_without_any_success() {
        let repo = repo_with_posts(&["http://a/1", "http://a/2", "http://a/3"]).await;
        // 1: failed then delivered; 2: failed twice; 3: delivered
        repo.log_notification(&make_record("http://a/1", false)).await.unwrap();
        repo.log_notification(&make_record("http://a/1", true)).await.unwrap();
        repo.log_notification(&make_record("http://a/2", false)).await.unwrap();
        let latest = repo.log_notification(&make_record("http://a/2", false)).await.unwrap();
        repo.log_notification(&make_record("http://a/3", true)).await.unwrap();

        let pending = repo.undelivered_notifications().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].post_url, "http://a/2");
        assert_eq!(pending[0].id, Some(latest));
    }
}
