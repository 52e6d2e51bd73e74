//! Bounded, cycle-safe link discovery.
//!
//! A crawl starts at a site's root URL (depth 0) and walks outbound links
//! breadth-first. Pages at depth `d < max_depth` are fetched and their links
//! recorded at depth `d + 1`; links at `max_depth` are recorded but never
//! followed. The root itself is never reported as a post.
//!
//! The frontier of one depth level is fetched concurrently (bounded by
//! `concurrency`), while the results are merged by the single task driving
//! the crawl. That task exclusively owns the visited set, so the
//! check-and-mark of a URL cannot race, and breadth-first order means every
//! URL is first seen at its minimal depth.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::services::fetcher::{FetchError, FetchedPage, PageFetcher};

/// Hops from the root a crawl may follow.
pub const DEFAULT_MAX_DEPTH: usize = 3;

pub const DEFAULT_CONCURRENCY: usize = 8;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A crawl that produced no result at all: the root could not be fetched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CrawlError {
    #[error("invalid root URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("root URL {url} is unreachable: {reason}")]
    Unreachable { url: String, reason: String },
}

impl CrawlError {
    /// The root URL that failed.
    pub fn url(&self) -> &str {
        match self {
            CrawlError::InvalidUrl { url, .. } | CrawlError::Unreachable { url, .. } => url,
        }
    }

    fn from_root_failure(root_url: &str, err: FetchError) -> Self {
        match err {
            FetchError::InvalidUrl { reason, .. } => CrawlError::InvalidUrl {
                url: root_url.to_string(),
                reason,
            },
            other => CrawlError::Unreachable {
                url: root_url.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Posts discovered from one root, in discovery order, without duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrawlResult {
    pub root_url: String,
    pub posts: Vec<String>,
    pub pages_fetched: usize,
    pub pages_failed: usize,
}

/// URLs already scheduled (or fetched) during one crawl invocation.
#[derive(Debug, Default)]
struct VisitedSet {
    urls: HashSet<String>,
}

impl VisitedSet {
    /// Marks `url` and returns `true` when it was not seen before.
    fn mark(&mut self, url: &str) -> bool {
        self.urls.insert(url.to_string())
    }
}

pub struct Crawler {
    fetcher: Arc<dyn PageFetcher>,
    max_depth: usize,
    concurrency: usize,
    fetch_timeout: Duration,
}

impl Crawler {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            fetcher,
            max_depth: DEFAULT_MAX_DEPTH,
            concurrency: DEFAULT_CONCURRENCY,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Discover every post reachable from `root_url` within the depth bound.
    ///
    /// Fails only when the root itself cannot be fetched; a failing page
    /// further down prunes its own subtree and nothing else.
    pub async fn crawl(&self, root_url: &str) -> Result<CrawlResult, CrawlError> {
        let root = self
            .fetch(root_url)
            .await
            .map_err(|err| CrawlError::from_root_failure(root_url, err))?;

        let mut visited = VisitedSet::default();
        visited.mark(root_url);
        // Links come back normalised ("http://host" -> "http://host/").
        if let Ok(normalised) = Url::parse(root_url) {
            visited.mark(normalised.as_str());
        }
        // A redirected root links to itself under its final address.
        visited.mark(&root.url);

        let mut posts = Vec::new();
        let mut pages_fetched = 1;
        let mut pages_failed = 0;

        let mut frontier = Vec::new();
        if self.max_depth > 0 {
            for link in root.links {
                if visited.mark(&link) {
                    posts.push(link.clone());
                    frontier.push(link);
                }
            }
        }

        let mut depth = 1;
        while depth < self.max_depth && !frontier.is_empty() {
            tracing::debug!(site = %root_url, depth, pages = frontier.len(), "Fetching frontier");

            let mut results = stream::iter(std::mem::take(&mut frontier))
                .map(|url| async move {
                    let result = self.fetch(&url).await;
                    (url, result)
                })
                .buffered(self.concurrency);

            let mut next = Vec::new();
            while let Some((url, result)) = results.next().await {
                match result {
                    Ok(page) => {
                        pages_fetched += 1;
                        // Reached under another address after a redirect.
                        visited.mark(&page.url);
                        for link in page.links {
                            if visited.mark(&link) {
                                posts.push(link.clone());
                                next.push(link);
                            }
                        }
                    }
                    Err(err) => {
                        pages_failed += 1;
                        tracing::debug!(site = %root_url, page = %url, "Pruning branch: {}", err);
                    }
                }
            }

            frontier = next;
            depth += 1;
        }

        tracing::info!(
            site = %root_url,
            posts = posts.len(),
            pages_fetched,
            pages_failed,
            "Crawl finished"
        );

        Ok(CrawlResult {
            root_url: root_url.to_string(),
            posts,
            pages_fetched,
            pages_failed,
        })
    }

    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch_page(url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
            }),
        }
    }
}
