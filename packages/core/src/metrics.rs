//! Prometheus metrics for sync runs.
//!
//! [`SyncMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once per process, wrap in `Arc`, and hand it to
//! the sync engine.
//!
//! Runs are triggered externally (cron, systemd timers), so instead of
//! serving `/metrics` the registry is written to a node-exporter textfile
//! collector file with [`SyncMetrics::write_textfile`].

use std::path::Path;

use prometheus::{Counter, Histogram, HistogramOpts, Opts, Registry};

pub struct SyncMetrics {
    /// Sites whose sync cycle completed (with or without new posts).
    pub sites_synced_total: Counter,
    /// Sites whose sync cycle failed (unreachable root, store error).
    pub site_failures_total: Counter,
    /// Pages fetched successfully across all crawls.
    pub pages_fetched_total: Counter,
    /// Posts recorded for the first time.
    pub posts_discovered_total: Counter,
    /// Notifications delivered.
    pub notifications_sent_total: Counter,
    /// Notifications whose delivery failed.
    pub notification_failures_total: Counter,
    /// Wall-clock duration of one site's sync cycle in seconds.
    pub site_sync_duration: Histogram,
    pub registry: Registry,
}

impl SyncMetrics {
    /// Create and register all metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let sites_synced_total = Counter::with_opts(Opts::new(
            "blog_notifier_sites_synced_total",
            "Sites whose sync cycle completed",
        ))?;

        let site_failures_total = Counter::with_opts(Opts::new(
            "blog_notifier_site_failures_total",
            "Sites whose sync cycle failed",
        ))?;

        let pages_fetched_total = Counter::with_opts(Opts::new(
            "blog_notifier_pages_fetched_total",
            "Pages fetched successfully while crawling",
        ))?;

        let posts_discovered_total = Counter::with_opts(Opts::new(
            "blog_notifier_posts_discovered_total",
            "Posts recorded for the first time",
        ))?;

        let notifications_sent_total = Counter::with_opts(Opts::new(
            "blog_notifier_notifications_sent_total",
            "Notifications delivered",
        ))?;

        let notification_failures_total = Counter::with_opts(Opts::new(
            "blog_notifier_notification_failures_total",
            "Notifications that could not be delivered",
        ))?;

        let site_sync_duration = Histogram::with_opts(
            HistogramOpts::new(
                "blog_notifier_site_sync_duration_seconds",
                "Duration of one site's sync cycle in seconds",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;

        registry.register(Box::new(sites_synced_total.clone()))?;
        registry.register(Box::new(site_failures_total.clone()))?;
        registry.register(Box::new(pages_fetched_total.clone()))?;
        registry.register(Box::new(posts_discovered_total.clone()))?;
        registry.register(Box::new(notifications_sent_total.clone()))?;
        registry.register(Box::new(notification_failures_total.clone()))?;
        registry.register(Box::new(site_sync_duration.clone()))?;

        Ok(Self {
            sites_synced_total,
            site_failures_total,
            pages_fetched_total,
            posts_discovered_total,
            notifications_sent_total,
            notification_failures_total,
            site_sync_duration,
            registry,
        })
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }

    /// Write the rendered metrics to `path`, replacing it atomically so a
    /// collector never reads a half-written file.
    pub fn write_textfile(&self, path: &Path) -> Result<(), crate::error::AppError> {
        let rendered = self.render()?;
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, rendered)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_metrics_register_without_error() {
        let metrics = SyncMetrics::new();
        assert!(metrics.is_ok(), "SyncMetrics::new() failed: {:?}", metrics.err());
    }

    #[test]
    fn render_contains_incremented_counter() {
        let metrics = SyncMetrics::new().unwrap();
        metrics.posts_discovered_total.inc_by(3.0);
        let output = metrics.render().unwrap();
        assert!(output.contains("blog_notifier_posts_discovered_total 3"));
    }

    #[test]
    fn histogram_records_observations() {
        let metrics = SyncMetrics::new().unwrap();
        metrics.site_sync_duration.observe(0.2);
        metrics.site_sync_duration.observe(3.0);
        assert_eq!(metrics.site_sync_duration.get_sample_count(), 2);
    }

    #[test]
    fn textfile_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blog_notifier.prom");

        let metrics = SyncMetrics::new().unwrap();
        metrics.sites_synced_total.inc();
        metrics.write_textfile(&path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("blog_notifier_sites_synced_total 1"));
        assert!(!dir.path().join("blog_notifier.prom.tmp").exists());
    }
}
