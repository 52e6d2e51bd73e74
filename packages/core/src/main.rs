use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use sqlx::SqlitePool;

use blog_notifier::cli::{Cli, Command};
use blog_notifier::config::Config;
use blog_notifier::crawler::Crawler;
use blog_notifier::credentials::NotifierConfig;
use blog_notifier::db;
use blog_notifier::error::AppError;
use blog_notifier::logging::init_logging;
use blog_notifier::metrics::SyncMetrics;
use blog_notifier::notifier::Notifier;
use blog_notifier::repository::WatchlistRepository;
use blog_notifier::services::HttpFetcher;
use blog_notifier::sync::SyncEngine;

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    let cli = Cli::parse();

    let config = match Config::from_env().and_then(|config| config.merge_cli(&cli)) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("{}", AppError::Config(err));
            std::process::exit(1);
        }
    };
    tracing::debug!("Starting with config: {:?}", config);

    if let Err(err) = run(cli.command, &config).await {
        tracing::error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(command: Command, config: &Config) -> Result<(), AppError> {
    match command {
        Command::CheckConfig { conf } => {
            let notifier_config = NotifierConfig::load(&conf)?;
            println!("{}", notifier_config.summary());
            Ok(())
        }

        Command::Migrate => {
            let pool = db::create_pool(&config.database_url).await?;
            for table in db::existing_tables(&pool).await? {
                println!("{}", table);
            }
            Ok(())
        }

        Command::Explore { url } => {
            let repo = repository(config).await?;
            let site = repo.add_site(&url).await?;
            tracing::info!(site = %site.root_url, "Site added");
            Ok(())
        }

        Command::Remove { url } => {
            let repo = repository(config).await?;
            repo.remove_site(&url).await?;
            tracing::info!(site = %url, "Site removed");
            Ok(())
        }

        Command::List => {
            let repo = repository(config).await?;
            for site in repo.list_sites().await? {
                println!("{} {}", site.root_url, site.last_link);
            }
            Ok(())
        }

        Command::ListPosts { site } => {
            let repo = repository(config).await?;
            // Listing posts of an unknown site is an error, not an empty list.
            repo.get_site(&site).await?;
            for post in repo.known_posts(&site).await? {
                println!("{}", post);
            }
            Ok(())
        }

        Command::UpdateLastLink { site, post } => {
            let repo = repository(config).await?;
            repo.update_last_link(&site, &post).await?;
            Ok(())
        }

        Command::Crawl { metrics_out } => {
            let metrics = Arc::new(SyncMetrics::new()?);
            let engine = engine(config, repository(config).await?, metrics.clone())?;

            let report = engine.sync_all().await?;
            println!("{}", report);
            write_metrics(&metrics, metrics_out.as_deref())
        }

        Command::Sync {
            conf,
            metrics_out,
            json,
        } => {
            // Configuration problems are fatal before any site is touched.
            let notifier_config = NotifierConfig::load(&conf)?;
            let notifier = Notifier::from_config(&notifier_config)?;
            tracing::info!(mode = %notifier_config.mode, "Notifier configured");

            let metrics = Arc::new(SyncMetrics::new()?);
            let engine = engine(config, repository(config).await?, metrics.clone())?
                .with_notifier(Arc::new(notifier));

            let report = engine.sync_all().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report);
            }
            write_metrics(&metrics, metrics_out.as_deref())
        }

        Command::Notifications {
            site,
            limit,
            failed,
        } => {
            let repo = repository(config).await?;
            let records = repo
                .notification_history(site.as_deref(), limit, failed)
                .await?;
            for record in records {
                let status = if record.delivered { "sent" } else { "FAILED" };
                println!(
                    "{} {} {} {} {}{}",
                    record.sent_at.to_rfc3339(),
                    status,
                    record.channel,
                    record.site,
                    record.post_url,
                    record
                        .error
                        .map(|err| format!(" ({})", err))
                        .unwrap_or_default(),
                );
            }
            Ok(())
        }

        Command::RetryFailed { conf } => {
            let notifier_config = NotifierConfig::load(&conf)?;
            let notifier = Notifier::from_config(&notifier_config)?;

            let metrics = Arc::new(SyncMetrics::new()?);
            let engine = engine(config, repository(config).await?, metrics)?
                .with_notifier(Arc::new(notifier));

            let report = engine.retry_failed().await?;
            println!(
                "{} attempted, {} delivered, {} still failing",
                report.attempted, report.delivered, report.still_failing
            );
            Ok(())
        }
    }
}

async fn repository(config: &Config) -> Result<WatchlistRepository, AppError> {
    let pool: SqlitePool = db::create_pool(&config.database_url).await?;
    Ok(WatchlistRepository::new(pool))
}

fn engine(
    config: &Config,
    repo: WatchlistRepository,
    metrics: Arc<SyncMetrics>,
) -> Result<SyncEngine, AppError> {
    let fetcher = HttpFetcher::new(&config.user_agent, config.fetch_timeout())?;
    let crawler = Crawler::new(Arc::new(fetcher))
        .with_concurrency(config.crawl_concurrency)
        .with_fetch_timeout(config.fetch_timeout());

    Ok(SyncEngine::new(repo, Arc::new(crawler))
        .with_metrics(metrics)
        .with_concurrency(config.sync_concurrency))
}

fn write_metrics(metrics: &SyncMetrics, path: Option<&Path>) -> Result<(), AppError> {
    if let Some(path) = path {
        metrics.write_textfile(path)?;
        tracing::info!(path = %path.display(), "Metrics written");
    }
    Ok(())
}
