//! Change detection and notification.
//!
//! One sync cycle for a site runs crawl, diff against the known posts,
//! persist each new post, notify about it and finally advance the
//! informational `last_link` marker. Cycles of different sites run
//! concurrently; cycles of the same site are serialised by [`SiteLocks`].
//!
//! Dedup is driven by post existence alone. A post is recorded before its
//! notification is sent and is never notified again by `sync`, even when the
//! delivery failed. Failed deliveries stay visible in the notification log
//! and can be re-sent on demand with [`SyncEngine::retry_failed`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::config::DEFAULT_SYNC_CONCURRENCY;
use crate::crawler::Crawler;
use crate::error::AppError;
use crate::metrics::SyncMetrics;
use crate::notifier::{format_message, Notify};
use crate::repository::{NotificationRecord, StoreError, WatchedSite, WatchlistRepository};

/// One async mutex per root URL, created on first use and dropped once
/// nobody holds or waits for it.
#[derive(Default)]
pub struct SiteLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SiteLocks {
    pub fn lock_for(&self, root_url: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.map()
            .entry(root_url.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Forget the lock of `root_url` unless another task still holds a
    /// handle to it. Call after dropping your own handle.
    pub fn release(&self, root_url: &str) {
        let mut locks = self.map();
        if locks
            .get(root_url)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(root_url);
        }
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SiteOutcome {
    Synced {
        /// Posts the crawl returned, known or not.
        discovered: usize,
        new_posts: usize,
        notified: usize,
        notification_failures: usize,
        pages_fetched: usize,
        /// The marker after this cycle; `None` when it was left untouched.
        last_link: Option<String>,
    },
    /// The cycle stopped early. Posts recorded and notifications sent
    /// before the failure are still counted.
    Failed {
        reason: String,
        new_posts: usize,
        notified: usize,
        notification_failures: usize,
    },
}

/// What a cycle got done, kept up to date as it runs.
#[derive(Debug, Default)]
struct CycleProgress {
    discovered: usize,
    new_posts: usize,
    notified: usize,
    notification_failures: usize,
    pages_fetched: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteReport {
    pub site: String,
    #[serde(flatten)]
    pub outcome: SiteOutcome,
}

/// Summary of one `sync_all` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub sites: Vec<SiteReport>,
    pub sites_failed: usize,
    pub new_posts: usize,
    pub notified: usize,
    pub notification_failures: usize,
}

impl SyncReport {
    pub fn from_sites(sites: Vec<SiteReport>) -> Self {
        let mut report = SyncReport::default();
        for site in &sites {
            let (new_posts, notified, notification_failures) = match &site.outcome {
                SiteOutcome::Synced {
                    new_posts,
                    notified,
                    notification_failures,
                    ..
                } => (new_posts, notified, notification_failures),
                SiteOutcome::Failed {
                    new_posts,
                    notified,
                    notification_failures,
                    ..
                } => {
                    report.sites_failed += 1;
                    (new_posts, notified, notification_failures)
                }
            };
            report.new_posts += new_posts;
            report.notified += notified;
            report.notification_failures += notification_failures;
        }
        report.sites = sites;
        report
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for site in &self.sites {
            match &site.outcome {
                SiteOutcome::Synced {
                    new_posts,
                    notified,
                    notification_failures,
                    ..
                } => writeln!(
                    f,
                    "{}: {} new, {} notified, {} failed notifications",
                    site.site, new_posts, notified, notification_failures
                )?,
                SiteOutcome::Failed {
                    reason,
                    new_posts: 0,
                    ..
                } => writeln!(f, "{}: FAILED {}", site.site, reason)?,
                SiteOutcome::Failed {
                    reason,
                    new_posts,
                    notified,
                    notification_failures,
                } => writeln!(
                    f,
                    "{}: FAILED {} (after {} new, {} notified, {} failed notifications)",
                    site.site, reason, new_posts, notified, notification_failures
                )?,
            }
        }
        write!(
            f,
            "{} sites, {} failed, {} new posts, {} notified, {} failed notifications",
            self.sites.len(),
            self.sites_failed,
            self.new_posts,
            self.notified,
            self.notification_failures
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub still_failing: usize,
}

pub struct SyncEngine {
    repository: WatchlistRepository,
    crawler: Arc<Crawler>,
    notifier: Option<Arc<dyn Notify>>,
    metrics: Option<Arc<SyncMetrics>>,
    locks: SiteLocks,
    concurrency: usize,
}

impl SyncEngine {
    pub fn new(repository: WatchlistRepository, crawler: Arc<Crawler>) -> Self {
        Self {
            repository,
            crawler,
            notifier: None,
            metrics: None,
            locks: SiteLocks::default(),
            concurrency: DEFAULT_SYNC_CONCURRENCY,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notify>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sync every watched site. Only listing the watchlist can fail the
    /// run as a whole; per-site failures end up in the report.
    pub async fn sync_all(&self) -> Result<SyncReport, StoreError> {
        let sites = self.repository.list_sites().await?;
        tracing::info!(sites = sites.len(), "Sync started");

        let reports = stream::iter(sites)
            .map(|site| async move { self.sync_site(&site).await })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let report = SyncReport::from_sites(reports);
        tracing::info!(
            sites = report.sites.len(),
            failed = report.sites_failed,
            new_posts = report.new_posts,
            notified = report.notified,
            "Sync finished"
        );
        Ok(report)
    }

    /// Run one sync cycle for `site`, waiting for any cycle of the same
    /// site that is already in progress.
    pub async fn sync_site(&self, site: &WatchedSite) -> SiteReport {
        let lock = self.locks.lock_for(&site.root_url);
        let guard = lock.lock().await;

        let started = Instant::now();
        let mut progress = CycleProgress::default();
        let result = self.run_cycle(&site.root_url, &mut progress).await;

        drop(guard);
        drop(lock);
        self.locks.release(&site.root_url);

        if let Some(metrics) = &self.metrics {
            metrics
                .site_sync_duration
                .observe(started.elapsed().as_secs_f64());
            record_progress(metrics, result.is_ok(), &progress);
        }

        let outcome = match result {
            Ok(last_link) => SiteOutcome::Synced {
                discovered: progress.discovered,
                new_posts: progress.new_posts,
                notified: progress.notified,
                notification_failures: progress.notification_failures,
                pages_fetched: progress.pages_fetched,
                last_link,
            },
            Err(err) => {
                tracing::warn!(
                    site = %site.root_url,
                    new_posts = progress.new_posts,
                    notified = progress.notified,
                    "Sync failed: {}",
                    err
                );
                SiteOutcome::Failed {
                    reason: err.to_string(),
                    new_posts: progress.new_posts,
                    notified: progress.notified,
                    notification_failures: progress.notification_failures,
                }
            }
        };

        SiteReport {
            site: site.root_url.clone(),
            outcome,
        }
    }

    /// Returns the new `last_link`, if it moved.
    async fn run_cycle(
        &self,
        root_url: &str,
        progress: &mut CycleProgress,
    ) -> Result<Option<String>, AppError> {
        let crawl = self.crawler.crawl(root_url).await?;
        progress.discovered = crawl.posts.len();
        progress.pages_fetched = crawl.pages_fetched;

        let known: HashSet<String> = self
            .repository
            .known_posts(root_url)
            .await?
            .into_iter()
            .collect();
        let fresh: Vec<String> = crawl
            .posts
            .into_iter()
            .filter(|post| !known.contains(post))
            .collect();

        let mut last_new = None;

        for post in fresh {
            match self.repository.add_post(root_url, &post).await {
                Ok(_) => {}
                Err(StoreError::DuplicatePost { .. }) => {
                    tracing::warn!(site = %root_url, post = %post, "Post recorded concurrently, skipping");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
            progress.new_posts += 1;

            if let Some(notifier) = &self.notifier {
                if self.deliver(notifier.as_ref(), root_url, &post).await {
                    progress.notified += 1;
                } else {
                    progress.notification_failures += 1;
                }
            }
            last_new = Some(post);
        }

        if let Some(post) = &last_new {
            self.repository.update_last_link(root_url, post).await?;
        }

        tracing::info!(
            site = %root_url,
            discovered = progress.discovered,
            new_posts = progress.new_posts,
            notified = progress.notified,
            notification_failures = progress.notification_failures,
            "Site synced"
        );

        Ok(last_new)
    }

    /// Send one notification and log the attempt. Returns whether it was
    /// delivered.
    async fn deliver(&self, notifier: &dyn Notify, site: &str, post: &str) -> bool {
        let result = notifier.notify(site, post).await;
        let delivered = result.is_ok();
        if let Err(err) = &result {
            tracing::warn!(site = %site, post = %post, channel = notifier.channel(), "Notification failed: {}", err);
        }

        let record = NotificationRecord {
            id: None,
            site: site.to_string(),
            post_url: post.to_string(),
            channel: notifier.channel().to_string(),
            message: format_message(site, post),
            delivered,
            error: result.err().map(|err| err.to_string()),
            sent_at: Utc::now(),
        };
        if let Err(err) = self.repository.log_notification(&record).await {
            tracing::error!(site = %site, post = %post, "Could not log notification: {}", err);
        }

        delivered
    }

    /// Re-send every notification whose attempts have all failed so far.
    pub async fn retry_failed(&self) -> Result<RetryReport, AppError> {
        let notifier = self
            .notifier
            .as_ref()
            .ok_or_else(|| AppError::Config("retrying notifications needs a notifier".to_string()))?;

        let pending = self.repository.undelivered_notifications().await?;
        let mut report = RetryReport::default();

        for record in pending {
            let lock = self.locks.lock_for(&record.site);
            let guard = lock.lock().await;

            report.attempted += 1;
            if self
                .deliver(notifier.as_ref(), &record.site, &record.post_url)
                .await
            {
                report.delivered += 1;
            } else {
                report.still_failing += 1;
            }

            drop(guard);
            drop(lock);
            self.locks.release(&record.site);
        }

        if let Some(metrics) = &self.metrics {
            metrics.notifications_sent_total.inc_by(report.delivered as f64);
            metrics
                .notification_failures_total
                .inc_by(report.still_failing as f64);
        }

        tracing::info!(
            attempted = report.attempted,
            delivered = report.delivered,
            "Retry finished"
        );
        Ok(report)
    }
}

fn record_progress(metrics: &SyncMetrics, succeeded: bool, progress: &CycleProgress) {
    if succeeded {
        metrics.sites_synced_total.inc();
    } else {
        metrics.site_failures_total.inc();
    }
    metrics.pages_fetched_total.inc_by(progress.pages_fetched as f64);
    metrics.posts_discovered_total.inc_by(progress.new_posts as f64);
    metrics.notifications_sent_total.inc_by(progress.notified as f64);
    metrics
        .notification_failures_total
        .inc_by(progress.notification_failures as f64);
}
