//! SQLite connection pool and schema.
//!
//! [`create_pool`] opens (creating if needed) the database and applies the
//! schema, so every caller, including tests using `sqlite::memory:`, gets a
//! ready-to-use pool.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS blogs (
        site        TEXT PRIMARY KEY,
        last_link   TEXT NOT NULL,
        added_at    TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS posts (
        site            TEXT NOT NULL,
        link            TEXT NOT NULL,
        discovered_at   TEXT NOT NULL,
        PRIMARY KEY (site, link),
        FOREIGN KEY (site) REFERENCES blogs(site) ON DELETE CASCADE
    )",
    "CREATE TABLE IF NOT EXISTS notifications (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        site        TEXT NOT NULL,
        link        TEXT NOT NULL,
        channel     TEXT NOT NULL,
        message     TEXT NOT NULL,
        delivered   INTEGER NOT NULL DEFAULT 0,
        error       TEXT,
        sent_at     TEXT NOT NULL,
        FOREIGN KEY (site, link) REFERENCES posts(site, link) ON DELETE CASCADE
    )",
    "CREATE INDEX IF NOT EXISTS idx_notifications_post ON notifications (site, link)",
];

/// Names of the tables [`migrate`] creates.
pub const TABLES: &[&str] = &["blogs", "posts", "notifications"];

/// Open a pool for `database_url` and make sure the schema exists.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let in_memory = database_url.contains(":memory:");

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    // An in-memory database lives only as long as its connections, and each
    // connection would otherwise see its own copy.
    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options.journal_mode(SqliteJournalMode::Wal))
            .await?
    };

    migrate(&pool).await?;
    Ok(pool)
}

/// Apply the schema. Safe to run repeatedly.
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;

    tracing::debug!("Database schema is up to date");
    Ok(())
}

/// Names of the tables that currently exist, sorted.
pub async fn existing_tables(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_pool_applies_schema() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        let tables = existing_tables(&pool).await.unwrap();
        for table in TABLES {
            assert!(tables.iter().any(|t| t == table), "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();
        assert_eq!(existing_tables(&pool).await.unwrap().len(), TABLES.len());
    }

    #[tokio::test]
    async fn file_database_is_created_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blogs.sqlite3");
        let url = format!("sqlite://{}", path.display());

        let pool = create_pool(&url).await.unwrap();
        pool.close().await;

        assert!(path.exists());
    }
}
