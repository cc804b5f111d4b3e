//! Remote directory-listing crawler.
//!
//! Repository mirrors expose their layout as plain HTML index pages.
//! [`ListingCrawler::discover`] walks those pages below a namespace and
//! collects every manifest URL it finds. Requests are paced by a rate limiter
//! so a large namespace does not hammer the mirror.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::num::NonZeroU32;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use regex::Regex;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::coordinate::{Coordinate, DEFAULT_MANIFEST_EXTENSION};

/// Default pause between listing requests (milliseconds)
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 100;

/// Default request timeout (seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 30;

type ListingRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn href_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<a\s[^>]*?href\s*=\s*"([^"]*)""#).expect("valid regex"))
}

/// Errors from directory listing.
#[derive(Debug, Error)]
pub enum ListingError {
    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Listing {url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },
}

/// Configuration for [`ListingCrawler`].
#[derive(Debug, Clone)]
pub struct ListingConfig {
    /// Repository base URL
    pub base_url: String,
    /// Manifest file extension
    pub extension: String,
    /// Minimum pause between requests; zero disables pacing
    pub request_delay: Duration,
    pub timeout_secs: u64,
}

impl ListingConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            extension: DEFAULT_MANIFEST_EXTENSION.to_string(),
            request_delay: Duration::from_millis(DEFAULT_REQUEST_DELAY_MS),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }
}

/// Crawls HTML directory listings for manifest URLs.
pub struct ListingCrawler {
    client: Client,
    base_url: String,
    extension: String,
    rate_limiter: Option<Arc<ListingRateLimiter>>,
}

impl ListingCrawler {
    pub fn new(config: ListingConfig) -> Result<Self, ListingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ListingError::Client(e.to_string()))?;

        let rate_limiter = Quota::with_period(config.request_delay)
            .map(|quota| Arc::new(RateLimiter::direct(quota.allow_burst(NonZeroU32::MIN))));

        Ok(Self {
            client,
            base_url: format!("{}/", config.base_url.trim_end_matches('/')),
            extension: config.extension,
            rate_limiter,
        })
    }

    async fn wait_for_permit(&self) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }
    }

    /// Listing URL for a namespace such as `org.apache.commons` or `org/apache`.
    pub fn namespace_url(&self, namespace: &str) -> String {
        let path = if namespace.contains('/') {
            namespace.trim_matches('/').to_string()
        } else {
            namespace.replace('.', "/")
        };
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}{}/", self.base_url, path)
        }
    }

    /// Collect every manifest URL below `namespace`, sorted.
    ///
    /// Failure to list the namespace root is an error; failures on deeper
    /// pages are logged and skipped.
    pub async fn discover(&self, namespace: &str) -> Result<Vec<String>, ListingError> {
        let root = self.namespace_url(namespace);
        let suffix = format!(".{}", self.extension);

        let mut queue = VecDeque::from([root.clone()]);
        let mut visited = HashSet::new();
        let mut manifests = BTreeSet::new();

        while let Some(page) = queue.pop_front() {
            if !visited.insert(page.clone()) {
                continue;
            }

            let html = match self.fetch_page(&page).await {
                Ok(html) => html,
                Err(e) if page == root => return Err(e),
                Err(e) => {
                    warn!(url = %page, error = %e, "Skipping unreadable listing page");
                    continue;
                }
            };

            for link in extract_links(&html, &page) {
                if link.ends_with('/') {
                    queue.push_back(link);
                } else if link.ends_with(&suffix) {
                    debug!(url = %link, "Found manifest");
                    manifests.insert(link);
                }
            }
        }

        info!(namespace, pages = visited.len(), manifests = manifests.len(), "Listing crawl finished");
        Ok(manifests.into_iter().collect())
    }

    /// Coordinate for a manifest URL under this crawler's base URL.
    pub fn coordinate_of(&self, url: &str) -> Option<Coordinate> {
        let path = url.strip_prefix(&self.base_url)?;
        Coordinate::from_url_path(path, &self.extension)
    }

    async fn fetch_page(&self, url: &str) -> Result<String, ListingError> {
        self.wait_for_permit().await;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ListingError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ListingError::Status {
                url: url.to_string(),
                status,
            });
        }

        response.text().await.map_err(|e| ListingError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

impl std::fmt::Debug for ListingCrawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListingCrawler")
            .field("base_url", &self.base_url)
            .field("extension", &self.extension)
            .field("paced", &self.rate_limiter.is_some())
            .finish()
    }
}

/// Absolute URLs of the links on a listing page that stay below it.
///
/// Parent links, query and fragment links, and links leaving the page's
/// directory are dropped.
pub fn extract_links(html: &str, page_url: &str) -> Vec<String> {
    href_pattern()
        .captures_iter(html)
        .filter_map(|caps| {
            let href = caps.get(1)?.as_str().trim();
            if href.is_empty() || href.starts_with("..") || href.starts_with(['?', '#']) {
                return None;
            }
            if href.contains("://") {
                return href.starts_with(page_url).then(|| href.to_string()).filter(|h| h != page_url);
            }
            if href.starts_with('/') {
                return None;
            }
            Some(format!("{}{}", page_url, href.trim_start_matches("./")))
        })
        .collect()
}
