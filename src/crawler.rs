//! Budgeted, strategy-steered traversal that looks for one target page.

use crate::fetcher::Fetcher;
use crate::frontier::LinkQueue;
use crate::link::Link;
use crate::obs;
use crate::page::Page;
use serde::Serialize;
use std::collections::HashSet;

/// Default maximum number of pages fetched by a single [`Crawler::find`].
pub const DEFAULT_CRAWL_BUDGET: usize = 5;

/// Decides which page the crawl is looking for and steers the queue between pages.
pub trait CrawlStrategy {
    /// True when `page` is the target; the crawl stops and returns it.
    fn accepts(&self, page: &Page) -> bool;

    /// Returns the queue to continue with after `page` was rejected.
    ///
    /// Receives the queue by value and hands back the next one, so the
    /// strategy never holds on to crawler state between pages.
    fn reprioritize(&self, _page: &Page, queue: LinkQueue) -> LinkQueue {
        queue
    }
}

impl<S: CrawlStrategy + ?Sized> CrawlStrategy for &S {
    fn accepts(&self, page: &Page) -> bool {
        (**self).accepts(page)
    }

    fn reprioritize(&self, page: &Page, queue: LinkQueue) -> LinkQueue {
        (**self).reprioritize(page, queue)
    }
}

/// Summary of a finished traversal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    /// Hrefs fetched (or attempted), in visit order.
    pub visited: Vec<String>,
    /// Fetches that failed and were skipped.
    pub skipped: usize,
    /// Href of the accepted page, if any.
    pub found: Option<String>,
}

impl CrawlReport {
    /// Number of pages counted against the budget.
    pub fn pages_visited(&self) -> usize {
        self.visited.len()
    }
}

/// Bounded crawler rooted at one site.
#[derive(Debug, Clone)]
pub struct Crawler {
    root: Link,
    budget: usize,
    queue: LinkQueue,
    visited: HashSet<String>,
    report: CrawlReport,
}

impl Crawler {
    /// Crawler with the default budget, seeded with `root`.
    pub fn new(root: Link) -> Self {
        Self::with_budget(root, DEFAULT_CRAWL_BUDGET)
    }

    /// Crawler that fetches at most `budget` pages.
    pub fn with_budget(root: Link, budget: usize) -> Self {
        Self {
            queue: LinkQueue::seeded(root.clone()),
            root,
            budget,
            visited: HashSet::new(),
            report: CrawlReport::default(),
        }
    }

    /// Root link.
    pub fn root(&self) -> &Link {
        &self.root
    }

    /// Page budget.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Links still queued.
    pub fn queue(&self) -> &LinkQueue {
        &self.queue
    }

    /// True when `href` has already been fetched (or attempted).
    pub fn has_visited(&self, href: &str) -> bool {
        self.visited.contains(href)
    }

    /// Progress so far.
    pub fn report(&self) -> &CrawlReport {
        &self.report
    }

    /// Walks the site until `strategy` accepts a page, the queue drains, or
    /// the budget is spent. Fetch and parse failures are logged and skipped.
    pub fn find<F, S>(&mut self, fetcher: &F, strategy: &S) -> Option<Page>
    where
        F: Fetcher + ?Sized,
        S: CrawlStrategy + ?Sized,
    {
        let span = tracing::info_span!("a11ycrawl.crawl", root = %self.root, budget = self.budget);
        let _guard = span.enter();

        while !self.queue.is_empty() && self.report.visited.len() < self.budget {
            let Ok(link) = self.queue.pop() else {
                break;
            };
            if self.visited.contains(link.href()) {
                continue;
            }
            self.mark_visited(&link);

            let page = match Page::fetch(fetcher, &link, &self.root) {
                Ok(page) if link == self.root && !page.url().same_origin(&self.root) => {
                    self.rebase(page.url().clone());
                    page.rooted_at(self.root.clone())
                }
                Ok(page) => page,
                Err(err) => {
                    self.report.skipped += 1;
                    obs::emit_page_skipped(link.href(), &err);
                    continue;
                }
            };
            if page.redirected() {
                self.visited.insert(page.url().href().to_string());
            }

            let discovered: Vec<Link> = page
                .internal_links()
                .filter(|candidate| !self.visited.contains(candidate.href()))
                .cloned()
                .collect();
            let queued = self.queue.add_all(discovered);
            obs::emit_page_fetched(page.url().href(), page.headings().len(), queued);

            if strategy.accepts(&page) {
                self.report.found = Some(page.url().href().to_string());
                obs::emit_crawl_finished(self.root.href(), self.report.visited.len(), true);
                return Some(page);
            }
            let queue = std::mem::take(&mut self.queue);
            self.queue = strategy.reprioritize(&page, queue);
        }

        obs::emit_crawl_finished(self.root.href(), self.report.visited.len(), false);
        None
    }

    /// Follows a homepage that redirected to another host.
    fn rebase(&mut self, root: Link) {
        tracing::info!(from = %self.root, to = %root, "site root redirected to another host");
        self.root = root;
    }

    fn mark_visited(&mut self, link: &Link) {
        self.visited.insert(link.href().to_string());
        self.report.visited.push(link.href().to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{FetchError, MemoryFetcher};
    use pretty_assertions::assert_eq;

    struct Never;

    impl CrawlStrategy for Never {
        fn accepts(&self, _page: &Page) -> bool {
            false
        }
    }

    struct TitleIs(&'static str);

    impl CrawlStrategy for TitleIs {
        fn accepts(&self, page: &Page) -> bool {
            page.title() == Some(self.0)
        }
    }

    fn root() -> Link {
        Link::normalize("https://site.test/").expect("valid root")
    }

    fn chain_site(pages: usize) -> MemoryFetcher {
        let mut fetcher = MemoryFetcher::new();
        for index in 0..pages {
            let url = if index == 0 {
                "https://site.test/".to_string()
            } else {
                format!("https://site.test/p{index}")
            };
            let html = format!(
                "<title>p{index}</title><a href=\"/p{}\">next</a><a href=\"/p{}\">skip</a>",
                index + 1,
                index + 2
            );
            fetcher = fetcher.with_page(&url, html);
        }
        fetcher
    }

    #[test]
    fn never_fetches_more_than_the_budget() {
        let fetcher = chain_site(20);
        let mut crawler = Crawler::with_budget(root(), 3);
        assert!(crawler.find(&fetcher, &Never).is_none());
        assert_eq!(fetcher.request_count(), 3);
        assert_eq!(crawler.report().pages_visited(), 3);
    }

    #[test]
    fn returns_none_when_queue_drains() {
        let fetcher = MemoryFetcher::new().with_page("https://site.test/", "<title>home</title>");
        let mut crawler = Crawler::new(root());
        assert!(crawler.find(&fetcher, &Never).is_none());
        assert_eq!(fetcher.request_count(), 1);
    }

    #[test]
    fn stops_at_the_accepted_page() {
        let fetcher = chain_site(10);
        let mut crawler = Crawler::new(root());
        let page = crawler.find(&fetcher, &TitleIs("p2")).expect("page found");
        assert_eq!(page.url().href(), "https://site.test/p2/");
        assert_eq!(crawler.report().found.as_deref(), Some("https://site.test/p2/"));
        assert_eq!(
            fetcher.requests(),
            vec!["https://site.test/", "https://site.test/p1/", "https://site.test/p2/"]
        );
    }

    #[test]
    fn failed_fetches_count_against_budget_but_do_not_abort() {
        let fetcher = MemoryFetcher::new()
            .with_page(
                "https://site.test/",
                r#"<a href="/broken">b</a><a href="/ok">o</a>"#,
            )
            .with_failure(
                "https://site.test/broken",
                FetchError::Http {
                    url: "https://site.test/broken/".to_string(),
                    message: "connection reset".to_string(),
                },
            )
            .with_page("https://site.test/ok", "<title>target</title>");
        let mut crawler = Crawler::new(root());
        assert!(crawler.find(&fetcher, &TitleIs("target")).is_some());
        assert_eq!(crawler.report().skipped, 1);
        assert_eq!(crawler.report().pages_visited(), 3);
    }

    #[test]
    fn external_links_and_visited_pages_are_not_queued() {
        let fetcher = MemoryFetcher::new()
            .with_page(
                "https://site.test/",
                r#"<a href="https://elsewhere.test/">x</a><a href="/">home</a><a href="/a">a</a>"#,
            )
            .with_page("https://site.test/a", r#"<a href="/">home</a>"#);
        let mut crawler = Crawler::new(root());
        assert!(crawler.find(&fetcher, &Never).is_none());
        assert_eq!(
            fetcher.requests(),
            vec!["https://site.test/", "https://site.test/a/"]
        );
    }

    #[test]
    fn redirect_targets_are_marked_visited() {
        let fetcher = MemoryFetcher::new()
            .with_redirect("https://site.test/", "https://site.test/accueil")
            .with_page("https://site.test/accueil", r#"<a href="/accueil">self</a>"#);
        let mut crawler = Crawler::new(root());
        assert!(crawler.find(&fetcher, &Never).is_none());
        assert!(crawler.has_visited("https://site.test/accueil/"));
        assert_eq!(fetcher.request_count(), 1);
    }

    #[test]
    fn homepage_moved_to_another_host_becomes_the_root() {
        let fetcher = MemoryFetcher::new()
            .with_redirect("https://site.test/", "https://new-site.test/home")
            .with_page(
                "https://new-site.test/home",
                r#"<a href="/contact">contact</a><a href="https://site.test/old">old</a>"#,
            )
            .with_page("https://new-site.test/contact", "<title>target</title>");
        let mut crawler = Crawler::new(root());
        let page = crawler.find(&fetcher, &TitleIs("target")).expect("page found");

        assert_eq!(page.url().href(), "https://new-site.test/contact/");
        assert_eq!(crawler.root().href(), "https://new-site.test/home/");
        assert_eq!(page.root_url().href(), "https://new-site.test/home/");
        assert_eq!(fetcher.request_count(), 2);
    }

    struct DropAll;

    impl CrawlStrategy for DropAll {
        fn accepts(&self, _page: &Page) -> bool {
            false
        }

        fn reprioritize(&self, _page: &Page, _queue: LinkQueue) -> LinkQueue {
            LinkQueue::new()
        }
    }

    #[test]
    fn strategy_can_replace_the_queue() {
        let fetcher = chain_site(5);
        let mut crawler = Crawler::new(root());
        assert!(crawler.find(&fetcher, &DropAll).is_none());
        assert_eq!(fetcher.request_count(), 1);
        assert!(crawler.queue().is_empty());
    }
}
