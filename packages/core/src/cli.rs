use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Blog Notifier CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "blog-notifier",
    version,
    about = "Watch blog sites and get notified once per new post"
)]
pub struct Cli {
    /// SQLite database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Per-page fetch timeout in seconds (overrides FETCH_TIMEOUT_SECONDS)
    #[arg(long, global = true)]
    pub fetch_timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the database and its tables
    Migrate,

    /// Add a site to the watchlist
    Explore {
        /// Root URL of the blog
        url: String,
    },

    /// Remove a site from the watchlist
    Remove {
        /// Root URL of the blog
        url: String,
    },

    /// List watched sites with their last-seen post
    List,

    /// List every known post of a site
    ListPosts {
        #[arg(long)]
        site: String,
    },

    /// Manually set the last-seen post of a site
    UpdateLastLink {
        #[arg(long)]
        site: String,
        #[arg(long)]
        post: String,
    },

    /// Crawl every watched site and record new posts without notifying
    Crawl {
        /// Write Prometheus metrics to this text file after the run
        #[arg(long)]
        metrics_out: Option<PathBuf>,
    },

    /// Crawl every watched site and notify about new posts
    Sync {
        /// Notifier configuration file (YAML)
        #[arg(long)]
        conf: PathBuf,

        /// Write Prometheus metrics to this text file after the run
        #[arg(long)]
        metrics_out: Option<PathBuf>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Parse a notifier configuration file and print a summary
    CheckConfig {
        #[arg(long)]
        conf: PathBuf,
    },

    /// Show the notification log
    Notifications {
        #[arg(long)]
        site: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: i64,

        /// Only show failed deliveries
        #[arg(long)]
        failed: bool,
    },

    /// Re-send notifications whose every delivery attempt failed
    RetryFailed {
        #[arg(long)]
        conf: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_posts_with_site_flag() {
        let cli = Cli::try_parse_from(["blog-notifier", "list-posts", "--site", "http://a"]).unwrap();
        match cli.command {
            Command::ListPosts { site } => assert_eq!(site, "http://a"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn global_overrides_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "blog-notifier",
            "list",
            "--database-url",
            "sqlite://x.db",
            "--fetch-timeout",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.database_url.as_deref(), Some("sqlite://x.db"));
        assert_eq!(cli.fetch_timeout, Some(5));
    }

    #[test]
    fn sync_requires_conf() {
        assert!(Cli::try_parse_from(["blog-notifier", "sync"]).is_err());
    }
}
