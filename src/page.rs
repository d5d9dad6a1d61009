//! Fetched HTML documents with lazily extracted text, headings, and links.

use crate::fetcher::{FetchError, Fetcher};
use crate::link::Link;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use thiserror::Error;

const IGNORED_TAGS: &[&str] = &["script", "style", "template", "noscript", "svg"];

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li",
    "main", "nav", "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

const SKIPPED_SCHEMES: &[&str] = &["mailto:", "tel:", "javascript:", "data:", "sms:", "ftp:"];

/// Errors raised while turning a response body into a [`Page`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The body had no content.
    #[error("{url}: empty document")]
    EmptyDocument {
        /// Page URL.
        url: String,
    },
    /// The body looks like binary data rather than markup.
    #[error("{url}: body is not markup")]
    NotMarkup {
        /// Page URL.
        url: String,
    },
}

/// Errors raised while fetching and parsing a page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    /// The fetcher failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The document could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// A heading in document order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Heading {
    /// Heading depth (1-6).
    pub level: u8,
    /// Collapsed visible text.
    pub text: String,
}

impl Heading {
    /// Builds a heading.
    pub fn new(level: u8, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }
}

#[derive(Debug, Default)]
struct Extraction {
    text: String,
    title: Option<String>,
    headings: Vec<Heading>,
    links: Vec<Link>,
}

/// A fetched document. Immutable once its HTML is fixed; derived views are
/// computed on first access and memoized.
#[derive(Debug)]
pub struct Page {
    url: Link,
    requested_url: Link,
    root_url: Link,
    raw_html: String,
    extraction: OnceLock<Extraction>,
}

impl Page {
    /// Fetches `link` and parses the response. `root` decides which links are internal.
    pub fn fetch<F>(fetcher: &F, link: &Link, root: &Link) -> Result<Self, PageError>
    where
        F: Fetcher + ?Sized,
    {
        let document = fetcher.fetch(link.href())?;
        let final_url = match Link::normalize(&document.final_url) {
            Ok(url) => url,
            Err(err) => {
                tracing::debug!(url = %link, error = %err, "unusable final url, keeping request url");
                link.clone()
            }
        };
        let page = Self::parse(final_url, root.clone(), document.html)?;
        Ok(page.requested_as(link.clone()))
    }

    /// Wraps already retrieved HTML.
    pub fn parse(url: Link, root_url: Link, raw_html: String) -> Result<Self, ParseError> {
        if raw_html.trim().is_empty() {
            return Err(ParseError::EmptyDocument {
                url: url.href().to_string(),
            });
        }
        if raw_html.contains('\0') {
            return Err(ParseError::NotMarkup {
                url: url.href().to_string(),
            });
        }
        Ok(Self {
            requested_url: url.clone(),
            url,
            root_url,
            raw_html,
            extraction: OnceLock::new(),
        })
    }

    /// Same document classified against a different site root.
    pub(crate) fn rooted_at(mut self, root: Link) -> Self {
        self.root_url = root;
        self
    }

    fn requested_as(mut self, requested: Link) -> Self {
        self.requested_url = requested;
        self
    }

    /// Final URL of the document.
    pub fn url(&self) -> &Link {
        &self.url
    }

    /// URL that was asked for, before redirects.
    pub fn requested_url(&self) -> &Link {
        &self.requested_url
    }

    /// Site root used for internal/external classification.
    pub fn root_url(&self) -> &Link {
        &self.root_url
    }

    /// True when the fetch ended on a different URL than requested.
    pub fn redirected(&self) -> bool {
        self.url != self.requested_url
    }

    /// Unmodified response body.
    pub fn raw_html(&self) -> &str {
        &self.raw_html
    }

    /// Visible body text with whitespace collapsed.
    pub fn text(&self) -> &str {
        &self.extraction().text
    }

    /// Contents of `<title>`, if any.
    pub fn title(&self) -> Option<&str> {
        self.extraction().title.as_deref()
    }

    /// Headings in document order.
    pub fn headings(&self) -> &[Heading] {
        &self.extraction().headings
    }

    /// Every distinct http(s) link on the page, in document order.
    pub fn links(&self) -> &[Link] {
        &self.extraction().links
    }

    /// Links pointing at the same site as the root.
    pub fn internal_links(&self) -> impl Iterator<Item = &Link> {
        self.links()
            .iter()
            .filter(|link| link.same_origin(&self.root_url))
    }

    /// Links pointing away from the site.
    pub fn external_links(&self) -> impl Iterator<Item = &Link> {
        self.links()
            .iter()
            .filter(|link| !link.same_origin(&self.root_url))
    }

    fn extraction(&self) -> &Extraction {
        self.extraction
            .get_or_init(|| extract(&self.raw_html, &self.url))
    }
}

struct PageSelectors {
    title: Selector,
    body: Selector,
    base: Selector,
    headings: Selector,
    anchors: Selector,
    image: Selector,
}

impl PageSelectors {
    fn get() -> &'static Self {
        static SELECTORS: OnceLock<PageSelectors> = OnceLock::new();
        SELECTORS.get_or_init(|| Self {
            title: Selector::parse("title").expect("title selector"),
            body: Selector::parse("body").expect("body selector"),
            base: Selector::parse("base[href]").expect("base selector"),
            headings: Selector::parse("h1, h2, h3, h4, h5, h6, [role=heading]")
                .expect("heading selector"),
            anchors: Selector::parse("a[href], area[href]").expect("anchor selector"),
            image: Selector::parse("img[alt]").expect("image selector"),
        })
    }
}

fn extract(html: &str, url: &Link) -> Extraction {
    let selectors = PageSelectors::get();
    let document = Html::parse_document(html);

    let title = document
        .select(&selectors.title)
        .next()
        .map(|element| collapse_whitespace(&element.text().collect::<String>()))
        .filter(|title| !title.is_empty());

    let root = document
        .select(&selectors.body)
        .next()
        .unwrap_or_else(|| document.root_element());
    let text = element_text(root);

    let headings = document
        .select(&selectors.headings)
        .filter(|element| !has_ignored_ancestor(element))
        .filter_map(heading_from)
        .collect();

    let base = document
        .select(&selectors.base)
        .next()
        .and_then(|element| element.value().attr("href"))
        .and_then(|href| Link::resolve(url, href).ok())
        .unwrap_or_else(|| url.clone());
    let links = extract_links(&document, selectors, &base);

    Extraction {
        text,
        title,
        headings,
        links,
    }
}

fn heading_from(element: ElementRef<'_>) -> Option<Heading> {
    let level = match element.value().name() {
        "h1" => 1,
        "h2" => 2,
        "h3" => 3,
        "h4" => 4,
        "h5" => 5,
        "h6" => 6,
        // role="heading" defaults to level 2 without aria-level.
        _ => element
            .value()
            .attr("aria-level")
            .and_then(|level| level.trim().parse::<u8>().ok())
            .filter(|level| (1..=6).contains(level))
            .unwrap_or(2),
    };
    let text = element_text(element);
    if text.is_empty() {
        return None;
    }
    Some(Heading { level, text })
}

fn extract_links(document: &Html, selectors: &PageSelectors, base: &Link) -> Vec<Link> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&selectors.anchors) {
        let Some(href) = element.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let lowered = href.to_ascii_lowercase();
        if SKIPPED_SCHEMES.iter().any(|scheme| lowered.starts_with(scheme)) {
            continue;
        }

        let link = match Link::resolve(base, href) {
            Ok(link) => link,
            Err(err) => {
                tracing::debug!(page = %base, error = %err, "dropping invalid link");
                continue;
            }
        };
        if !seen.insert(link.href().to_string()) {
            continue;
        }
        links.push(link.with_text(&anchor_text(element, selectors)));
    }
    links
}

fn anchor_text(element: ElementRef<'_>, selectors: &PageSelectors) -> String {
    let text = element_text(element);
    if !text.is_empty() {
        return text;
    }
    let attr = |name: &str| {
        element
            .value()
            .attr(name)
            .map(collapse_whitespace)
            .filter(|value| !value.is_empty())
    };
    attr("aria-label")
        .or_else(|| attr("title"))
        .or_else(|| {
            element
                .select(&selectors.image)
                .filter_map(|image| image.value().attr("alt"))
                .map(collapse_whitespace)
                .find(|alt| !alt.is_empty())
        })
        .unwrap_or_default()
}

fn element_text(element: ElementRef<'_>) -> String {
    let mut raw = String::new();
    collect_text(element, &mut raw);
    collapse_whitespace(&raw)
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    let tag = element.value().name();
    if IGNORED_TAGS.contains(&tag) {
        return;
    }
    let block = BLOCK_TAGS.contains(&tag);
    if block {
        out.push(' ');
    }
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child) = ElementRef::wrap(child) {
            collect_text(child, out);
        }
    }
    if block {
        out.push(' ');
    }
}

fn has_ignored_ancestor(element: &ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| IGNORED_TAGS.contains(&ancestor.value().name()))
}

/// Collapses runs of whitespace into single spaces and trims the ends.
pub(crate) fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::MemoryFetcher;
    use pretty_assertions::assert_eq;

    const ROOT: &str = "https://www.mairie.test/";

    fn page(html: &str) -> Page {
        let root = Link::normalize(ROOT).unwrap();
        Page::parse(root.clone(), root, html.to_string()).expect("parse")
    }

    #[test]
    fn extracts_title_text_and_headings() {
        let page = page(
            r#"
            <html>
              <head><title> Déclaration
                 d'accessibilité </title><style>h1 { color: red }</style></head>
              <body>
                <h1>Déclaration d'<span>accessibilité</span></h1>
                <p>Le site est <b>partiellement</b> conforme.</p>
                <div role="heading" aria-level="3">Résultats des tests</div>
                <h2>   </h2>
                <script>var heading = "<h2>nope</h2>";</script>
                <h2>Voies de recours</h2>
              </body>
            </html>
            "#,
        );

        assert_eq!(page.title(), Some("Déclaration d'accessibilité"));
        assert_eq!(
            page.headings(),
            &[
                Heading::new(1, "Déclaration d'accessibilité"),
                Heading::new(3, "Résultats des tests"),
                Heading::new(2, "Voies de recours"),
            ]
        );
        assert!(page.text().contains("Le site est partiellement conforme."));
        assert!(!page.text().contains("var heading"));
    }

    #[test]
    fn block_elements_do_not_glue_words() {
        let page = page("<body><p>alpha</p><p>beta</p></body>");
        assert_eq!(page.text(), "alpha beta");
    }

    #[test]
    fn classifies_and_dedupes_links() {
        let page = page(
            r##"
            <a href="/accessibilite">Accessibilité : partiellement conforme</a>
            <a href="https://mairie.test/accessibilite#haut">duplicate</a>
            <a href="https://service-public.fr/">Service public</a>
            <a href="mailto:contact@mairie.test">Contact</a>
            <a href="#main">Skip</a>
            <a href="javascript:void(0)">Menu</a>
            <a href="/plan" aria-label="Plan du site"></a>
            <a href="/logo"><img src="logo.png" alt="Accueil"></a>
            "##,
        );

        let internal: Vec<(&str, &str)> = page
            .internal_links()
            .map(|link| (link.href(), link.text()))
            .collect();
        assert_eq!(
            internal,
            vec![
                (
                    "https://www.mairie.test/accessibilite/",
                    "Accessibilité : partiellement conforme"
                ),
                ("https://mairie.test/accessibilite/", "duplicate"),
                ("https://www.mairie.test/plan/", "Plan du site"),
                ("https://www.mairie.test/logo/", "Accueil"),
            ]
        );
        let external: Vec<&str> = page.external_links().map(Link::href).collect();
        assert_eq!(external, vec!["https://service-public.fr/"]);
    }

    #[test]
    fn honours_base_element() {
        let page = page(r#"<head><base href="/fr/"></head><a href="a11y">x</a>"#);
        assert_eq!(page.links()[0].href(), "https://www.mairie.test/fr/a11y/");
    }

    #[test]
    fn rejects_empty_and_binary_bodies() {
        let root = Link::normalize(ROOT).unwrap();
        assert!(matches!(
            Page::parse(root.clone(), root.clone(), "  \n".to_string()),
            Err(ParseError::EmptyDocument { .. })
        ));
        assert!(matches!(
            Page::parse(root.clone(), root, "%PDF\0\0".to_string()),
            Err(ParseError::NotMarkup { .. })
        ));
    }

    #[test]
    fn fetch_records_redirects() {
        let fetcher = MemoryFetcher::new()
            .with_redirect("https://www.mairie.test/a11y", "https://www.mairie.test/accessibilite")
            .with_page("https://www.mairie.test/accessibilite", "<h1>Accessibilité</h1>");
        let root = Link::normalize(ROOT).unwrap();
        let requested = Link::normalize("https://www.mairie.test/a11y").unwrap();

        let page = Page::fetch(&fetcher, &requested, &root).expect("fetched");
        assert!(page.redirected());
        assert_eq!(page.url().href(), "https://www.mairie.test/accessibilite/");
        assert_eq!(page.requested_url(), &requested);
    }

    #[test]
    fn fetch_propagates_fetch_errors() {
        let fetcher = MemoryFetcher::new();
        let root = Link::normalize(ROOT).unwrap();
        let err = Page::fetch(&fetcher, &root, &root).unwrap_err();
        assert!(matches!(err, PageError::Fetch(FetchError::Status { status: 404, .. })));
    }
}
