use std::env;
use std::time::Duration;

use crate::cli::Cli;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://blogs.sqlite3";
pub const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_CRAWL_CONCURRENCY: usize = 8;
pub const DEFAULT_SYNC_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub fetch_timeout_seconds: u64,
    pub crawl_concurrency: usize,
    pub sync_concurrency: usize,
    pub user_agent: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset keys fall back to
    /// their defaults; set-but-invalid keys are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let fetch_timeout_seconds = parse_positive(
            &lookup,
            "FETCH_TIMEOUT_SECONDS",
            DEFAULT_FETCH_TIMEOUT_SECONDS,
        )?;
        let crawl_concurrency =
            parse_positive(&lookup, "CRAWL_CONCURRENCY", DEFAULT_CRAWL_CONCURRENCY as u64)?
                as usize;
        let sync_concurrency =
            parse_positive(&lookup, "SYNC_CONCURRENCY", DEFAULT_SYNC_CONCURRENCY as u64)?
                as usize;

        let user_agent = lookup("USER_AGENT").unwrap_or_else(default_user_agent);

        Ok(Self {
            database_url,
            fetch_timeout_seconds,
            crawl_concurrency,
            sync_concurrency,
            user_agent,
        })
    }

    /// Apply command-line overrides on top of the environment. Overrides
    /// are validated like their environment counterparts.
    pub fn merge_cli(mut self, cli: &Cli) -> Result<Self, String> {
        if let Some(url) = &cli.database_url {
            self.database_url = url.clone();
        }
        if let Some(secs) = cli.fetch_timeout {
            if secs == 0 {
                return Err("--fetch-timeout must be greater than zero".to_string());
            }
            self.fetch_timeout_seconds = secs;
        }
        Ok(self)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

fn parse_positive<F>(lookup: &F, key: &str, default: u64) -> Result<u64, String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(0) => Err(format!("{} must be greater than zero", key)),
            Ok(value) => Ok(value),
            Err(_) => Err(format!("{} must be a valid number, got '{}'", key, raw)),
        },
    }
}

fn default_user_agent() -> String {
    format!("blog-notifier/{}", env!("CARGO_PKG_VERSION"))
}
