//! Page fetching and hyperlink extraction.
//!
//! [`PageFetcher`] is the only capability the crawler needs from the
//! network: give it a URL, get back the outbound links of that page.
//! [`HttpFetcher`] is the production implementation over `reqwest` +
//! `scraper`.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

/// Why a single page could not be fetched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("{url} is unreachable: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("fetching {url} timed out")]
    Timeout { url: String },
}

/// A fetched page: where it ended up after redirects, and what it links to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// Final URL of the page, after any redirects.
    pub url: String,
    /// Outbound links, absolute and deduplicated in document order.
    pub links: Vec<String>,
}

/// Source of outbound hyperlinks for a page.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self { http })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let target = parse_http_url(url)?;

        let response = self
            .http
            .get(target)
            .send()
            .await
            .map_err(|err| classify(url, err))?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        // Resolve relative links against the final URL, after redirects.
        let base = response.url().clone();
        let body = response.text().await.map_err(|err| classify(url, err))?;

        Ok(FetchedPage {
            url: base.to_string(),
            links: extract_links(&base, &body),
        })
    }
}

/// Parse `raw` and accept only http(s) URLs.
pub fn parse_http_url(raw: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(raw.trim()).map_err(|err| FetchError::InvalidUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(FetchError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

/// Extract every `<a href>` of an HTML document as an absolute http(s) URL.
///
/// Fragments are stripped, non-web schemes are skipped and repeated links
/// are collapsed, keeping the first occurrence.
pub fn extract_links(base: &Url, html: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() {
            continue;
        }

        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        resolved.set_fragment(None);

        let link = resolved.to_string();
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }

    links
}

fn classify(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Unreachable {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://blog.example.com/posts/index.html").unwrap()
    }

    #[test]
    fn extracts_absolute_and_relative_links() {
        let html = r#"
            <html><body>
              <a href="http://other.example.com/a.html">a</a>
              <a href="b.html">b</a>
              <a href="/c.html">c</a>
            </body></html>"#;

        let links = extract_links(&base(), html);
        assert_eq!(
            links,
            vec![
                "http://other.example.com/a.html",
                "http://blog.example.com/posts/b.html",
                "http://blog.example.com/c.html",
            ]
        );
    }

    #[test]
    fn skips_non_web_schemes_and_empty_hrefs() {
        let html = r#"
            <a href="mailto:me@example.com">mail</a>
            <a href="javascript:void(0)">js</a>
            <a href="">empty</a>
            <a>no href</a>
            <a href="ok.html">ok</a>"#;

        let links = extract_links(&base(), html);
        assert_eq!(links, vec!["http://blog.example.com/posts/ok.html"]);
    }

    #[test]
    fn strips_fragments_and_collapses_duplicates() {
        let html = r##"
            <a href="post.html#comments">1</a>
            <a href="post.html">2</a>
            <a href="post.html#top">3</a>"##;

        let links = extract_links(&base(), html);
        assert_eq!(links, vec!["http://blog.example.com/posts/post.html"]);
    }

    #[test]
    fn page_without_links_yields_nothing() {
        assert!(extract_links(&base(), "<html><body><p>hi</p></body></html>").is_empty());
    }

    #[test]
    fn parse_http_url_rejects_garbage_and_other_schemes() {
        assert!(matches!(
            parse_http_url("not a url"),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(matches!(
            parse_http_url("ftp://example.com/"),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(parse_http_url("https://example.com/").is_ok());
    }

    #[tokio::test]
    async fn fetching_invalid_url_fails_without_network() {
        let fetcher = HttpFetcher::new("test", Duration::from_secs(1)).unwrap();
        let err = fetcher.fetch_page("::nope::").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { ref url, .. } if url == "::nope::"));
    }
}
