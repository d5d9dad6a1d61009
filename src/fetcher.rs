//! Page retrieval behind a pluggable [`Fetcher`] seam.

use crate::controls::DEFAULT_USER_AGENT;
use crate::link::Link;
use lru::LruCache;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Raw HTML plus the URL the request finally resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    /// Response body decoded as text.
    pub html: String,
    /// URL after following redirects.
    pub final_url: String,
}

impl FetchedDocument {
    /// Builds a document payload.
    pub fn new(html: impl Into<String>, final_url: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            final_url: final_url.into(),
        }
    }
}

/// Errors surfaced while retrieving a page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Transport failure (DNS, TLS, timeout, connection reset).
    #[error("http error for {url}: {message}")]
    Http {
        /// Requested URL.
        url: String,
        /// Transport diagnostic.
        message: String,
    },
    /// The server answered with a non-success status.
    #[error("{url} answered with status {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// The response is not an HTML document.
    #[error("{url} is not html (content-type {content_type:?})")]
    NotHtml {
        /// Requested URL.
        url: String,
        /// Reported content type.
        content_type: String,
    },
}

/// Retrieves HTML documents. Implementations must follow redirects and report
/// the final URL.
pub trait Fetcher {
    /// Fetches `url`, blocking until the document is retrieved or fails.
    fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError>;
}

impl<F: Fetcher + ?Sized> Fetcher for &F {
    fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        (**self).fetch(url)
    }
}

impl<F: Fetcher + ?Sized> Fetcher for Box<F> {
    fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        (**self).fetch(url)
    }
}

impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        (**self).fetch(url)
    }
}

/// Blocking HTTP fetcher backed by `reqwest`.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Builds a client with the default user agent.
    pub fn new(timeout: Duration, max_redirects: usize) -> Result<Self, reqwest::Error> {
        Self::with_user_agent(DEFAULT_USER_AGENT, timeout, max_redirects)
    }

    /// Builds a client with a caller-supplied user agent.
    pub fn with_user_agent(
        user_agent: &str,
        timeout: Duration,
        max_redirects: usize,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(max_redirects))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        let http = |err: reqwest::Error| FetchError::Http {
            url: url.to_string(),
            message: err.to_string(),
        };

        let response = self.client.get(url).send().map_err(http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_ascii_lowercase())
            .unwrap_or_default();
        if !content_type.is_empty() && !is_html_content_type(&content_type) {
            return Err(FetchError::NotHtml {
                url: url.to_string(),
                content_type,
            });
        }

        let final_url = response.url().to_string();
        let html = response.text().map_err(http)?;
        Ok(FetchedDocument { html, final_url })
    }
}

fn is_html_content_type(content_type: &str) -> bool {
    content_type.starts_with("text/html") || content_type.starts_with("application/xhtml+xml")
}

/// Wraps a fetcher with an LRU cache whose entries expire after `ttl`.
///
/// Only successful fetches are cached.
pub struct CachedFetcher<F> {
    inner: F,
    ttl: Duration,
    cache: Mutex<LruCache<String, (Instant, FetchedDocument)>>,
}

impl<F: Fetcher> CachedFetcher<F> {
    /// Wraps `inner`; a zero `capacity` is bumped to one entry.
    pub fn new(inner: F, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            ttl,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    fn cached(&self, url: &str) -> Option<FetchedDocument> {
        let mut cache = self.cache.lock().ok()?;
        let (stored_at, _) = cache.peek(url)?;
        if stored_at.elapsed() >= self.ttl {
            cache.pop(url);
            return None;
        }
        cache.get(url).map(|(_, document)| document.clone())
    }
}

impl<F: Fetcher> Fetcher for CachedFetcher<F> {
    fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        if let Some(document) = self.cached(url) {
            tracing::debug!(url, "page cache hit");
            return Ok(document);
        }
        let document = self.inner.fetch(url)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(url.to_string(), (Instant::now(), document.clone()));
        }
        Ok(document)
    }
}

#[derive(Debug, Clone)]
enum Route {
    Document(String),
    Redirect(String),
    Failure(FetchError),
}

/// In-memory fetcher keyed by normalized href, for tests and offline runs.
///
/// Unknown URLs answer with a 404 status error. Every request is recorded and
/// can be inspected through [`MemoryFetcher::requests`].
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    routes: HashMap<String, Route>,
    requests: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    /// Constructs an empty fetcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves `html` at `url`.
    pub fn with_page(mut self, url: &str, html: impl Into<String>) -> Self {
        self.routes.insert(route_key(url), Route::Document(html.into()));
        self
    }

    /// Redirects `from` to `to` (a single hop; chains are followed on fetch).
    pub fn with_redirect(mut self, from: &str, to: &str) -> Self {
        self.routes
            .insert(route_key(from), Route::Redirect(route_key(to)));
        self
    }

    /// Fails every fetch of `url` with `error`.
    pub fn with_failure(mut self, url: &str, error: FetchError) -> Self {
        self.routes.insert(route_key(url), Route::Failure(error));
        self
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Number of fetches issued so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|requests| requests.len()).unwrap_or(0)
    }
}

impl Fetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }

        let mut current = route_key(url);
        // Bounded like the HTTP client's redirect policy.
        for _ in 0..=5 {
            match self.routes.get(&current) {
                Some(Route::Document(html)) => {
                    return Ok(FetchedDocument::new(html.clone(), current));
                }
                Some(Route::Redirect(target)) => current = target.clone(),
                Some(Route::Failure(err)) => return Err(err.clone()),
                None => break,
            }
        }
        Err(FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

fn route_key(url: &str) -> String {
    Link::normalize(url)
        .map(|link| link.href().to_string())
        .unwrap_or_else(|_| url.to_string())
}
