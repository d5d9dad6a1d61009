//! Normalized URL value type used as the crawl identity.

use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;
use url::Url;

/// Errors raised while turning an `href` into a [`Link`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The input could not be parsed as an absolute http(s) URL.
    #[error("invalid url {href:?}: {reason}")]
    InvalidUrl {
        /// Raw input as received.
        href: String,
        /// Parser diagnostic.
        reason: String,
    },
}

impl LinkError {
    fn invalid(href: &str, reason: impl fmt::Display) -> Self {
        Self::InvalidUrl {
            href: href.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A normalized absolute URL plus the display text it was found with.
///
/// Equality and hashing only consider [`Link::href`]; the text is metadata.
#[derive(Debug, Clone)]
pub struct Link {
    href: String,
    text: String,
    url: Url,
}

impl Link {
    /// Normalizes an absolute `href`.
    pub fn normalize(href: &str) -> Result<Self, LinkError> {
        let url = Url::parse(href.trim()).map_err(|err| LinkError::invalid(href, err))?;
        Self::from_url(url, href)
    }

    /// Resolves `href` against `base` and normalizes the result.
    pub fn resolve(base: &Link, href: &str) -> Result<Self, LinkError> {
        let url = base
            .url
            .join(href.trim())
            .map_err(|err| LinkError::invalid(href, err))?;
        Self::from_url(url, href)
    }

    /// Attaches display text, collapsing inner whitespace.
    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        self
    }

    /// Normalized absolute URL string.
    pub fn href(&self) -> &str {
        &self.href
    }

    /// Trimmed display text (may be empty).
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Parsed form of the link, with an ASCII (punycode) host.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Host as a lowercase ASCII string.
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    /// True when `other` points at the same site, treating `www.` as equivalent.
    pub fn same_origin(&self, other: &Link) -> bool {
        match (self.host(), other.host()) {
            (Some(left), Some(right)) => strip_www(left) == strip_www(right),
            _ => false,
        }
    }

    fn from_url(mut url: Url, raw: &str) -> Result<Self, LinkError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(LinkError::invalid(
                raw,
                format!("unsupported scheme `{}`", url.scheme()),
            ));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(LinkError::invalid(raw, "missing host"));
        }

        url.set_fragment(None);
        let path = normalize_path(url.path());
        url.set_path(&path);

        let href = render(&url);
        Ok(Self {
            href,
            text: String::new(),
            url,
        })
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.href == other.href
    }
}

impl Eq for Link {}

impl Hash for Link {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.href.hash(state);
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.href)
    }
}

impl Serialize for Link {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.href)
    }
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Collapses duplicate slashes, resolves dot segments, and appends a trailing
/// slash to extension-less paths.
fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    if segments.is_empty() {
        return "/".to_string();
    }

    let mut out = String::with_capacity(path.len() + 1);
    for segment in &segments {
        out.push('/');
        out.push_str(segment);
    }
    let has_extension = segments
        .last()
        .is_some_and(|last| last.rfind('.').is_some_and(|idx| idx > 0 && idx + 1 < last.len()));
    if !has_extension {
        out.push('/');
    }
    out
}

/// Renders the URL with a Unicode host so normalized hrefs read like the
/// original site address.
fn render(url: &Url) -> String {
    let ascii_host = url.host_str().unwrap_or_default();
    let (unicode_host, result) = idna::domain_to_unicode(ascii_host);
    let host = if result.is_ok() {
        unicode_host
    } else {
        ascii_host.to_string()
    };

    let mut out = String::with_capacity(url.as_str().len());
    out.push_str(url.scheme());
    out.push_str("://");
    if !url.username().is_empty() {
        out.push_str(url.username());
        if let Some(password) = url.password() {
            out.push(':');
            out.push_str(password);
        }
        out.push('@');
    }
    out.push_str(&host);
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(url.path());
    if let Some(query) = url.query() {
        out.push('?');
        out.push_str(query);
    }
    out
}
