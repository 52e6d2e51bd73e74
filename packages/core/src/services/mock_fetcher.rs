//! In-memory link graph implementing [`PageFetcher`].
//!
//! Used by tests (unit and integration) in place of a real web server.
//! Pages not registered in the graph are reported as unreachable; redirects
//! answer with the target page and report the target as the final URL.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::services::fetcher::{FetchError, FetchedPage, PageFetcher};

#[derive(Debug, Default)]
pub struct MockFetcher {
    pages: Mutex<HashMap<String, Vec<String>>>,
    fetches: Mutex<HashMap<String, usize>>,
    delays: Mutex<HashMap<String, Duration>>,
    redirects: Mutex<HashMap<String, String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `url` as a reachable page linking to `links`.
    pub fn with_page(self, url: &str, links: &[&str]) -> Self {
        self.set_page(url, links);
        self
    }

    /// Make fetches of `url` take `delay` before answering.
    pub fn with_delay(self, url: &str, delay: Duration) -> Self {
        lock(&self.delays).insert(url.to_string(), delay);
        self
    }

    /// Make `from` redirect to `to`.
    pub fn with_redirect(self, from: &str, to: &str) -> Self {
        lock(&self.redirects).insert(from.to_string(), to.to_string());
        self
    }

    /// Replace (or add) a page; lets tests change the "remote" site between syncs.
    pub fn set_page(&self, url: &str, links: &[&str]) {
        lock(&self.pages).insert(
            url.to_string(),
            links.iter().map(|l| l.to_string()).collect(),
        );
    }

    /// Make a previously registered page unreachable.
    pub fn remove_page(&self, url: &str) {
        lock(&self.pages).remove(url);
    }

    /// How many times `url` has been fetched.
    pub fn fetch_count(&self, url: &str) -> usize {
        lock(&self.fetches).get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage, FetchError> {
        *lock(&self.fetches).entry(url.to_string()).or_insert(0) += 1;

        let delay = lock(&self.delays).get(url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let target = lock(&self.redirects)
            .get(url)
            .cloned()
            .unwrap_or_else(|| url.to_string());

        let links = lock(&self.pages)
            .get(&target)
            .cloned()
            .ok_or_else(|| FetchError::Unreachable {
                url: url.to_string(),
                reason: "no such page".to_string(),
            })?;

        Ok(FetchedPage { url: target, links })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
