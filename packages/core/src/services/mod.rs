pub mod fetcher;
#[cfg(any(test, feature = "test-util"))]
pub mod mock_fetcher;

pub use fetcher::{FetchError, FetchedPage, HttpFetcher, PageFetcher};
#[cfg(any(test, feature = "test-util"))]
pub use mock_fetcher::MockFetcher;
