//! Audit tuning knobs, locale tables, and the shared command-line surface.

use crate::crawler::DEFAULT_CRAWL_BUDGET;
use crate::declaration::{DEFAULT_ACCEPTANCE_THRESHOLD, DEFAULT_MIN_MATCHING_HEADINGS};
use crate::headings::DEFAULT_MATCH_THRESHOLD;
use clap::Parser;
use std::time::Duration;

/// User agent sent by the HTTP fetcher unless overridden.
pub const DEFAULT_USER_AGENT: &str = concat!("a11ycrawl/", env!("CARGO_PKG_VERSION"));

const FRENCH_MONTHS: &[(&str, u32)] = &[
    ("janvier", 1),
    ("février", 2),
    ("fevrier", 2),
    ("mars", 3),
    ("avril", 4),
    ("mai", 5),
    ("juin", 6),
    ("juillet", 7),
    ("août", 8),
    ("aout", 8),
    ("septembre", 9),
    ("octobre", 10),
    ("novembre", 11),
    ("décembre", 12),
    ("decembre", 12),
];

const ENGLISH_MONTHS: &[(&str, u32)] = &[
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
];

/// Month-name table used by date extraction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocaleConfig {
    months: Vec<(String, u32)>,
}

impl LocaleConfig {
    /// A table with no month names (only numeric dates will be read).
    pub fn empty() -> Self {
        Self { months: Vec::new() }
    }

    /// French month names, with and without accents.
    pub fn french() -> Self {
        Self::empty().with_months(FRENCH_MONTHS)
    }

    /// English month names.
    pub fn english() -> Self {
        Self::empty().with_months(ENGLISH_MONTHS)
    }

    /// Adds one month name; names are matched case-insensitively.
    pub fn with_month(mut self, name: &str, number: u32) -> Self {
        let name = name.trim().to_lowercase();
        if !name.is_empty() && (1..=12).contains(&number) && self.month(&name).is_none() {
            self.months.push((name, number));
        }
        self
    }

    fn with_months(self, months: &[(&str, u32)]) -> Self {
        months
            .iter()
            .fold(self, |locale, (name, number)| locale.with_month(name, *number))
    }

    /// Month number for `name`, if known.
    pub fn month(&self, name: &str) -> Option<u32> {
        let name = name.trim().to_lowercase();
        self.months
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, number)| *number)
    }

    /// Every registered month name.
    pub fn month_names(&self) -> impl Iterator<Item = &str> {
        self.months.iter().map(|(name, _)| name.as_str())
    }
}

impl Default for LocaleConfig {
    fn default() -> Self {
        Self::french().with_months(ENGLISH_MONTHS)
    }
}

/// Tunable knobs that bound an audit.
#[derive(Clone, Debug, PartialEq)]
pub struct AuditControls {
    crawl_budget: usize,
    structure_threshold: f64,
    offset_threshold: f64,
    acceptance_threshold: f64,
    min_matching_headings: usize,
    user_agent: String,
    request_timeout: Duration,
    max_redirects: usize,
    cache_capacity: usize,
    cache_ttl: Duration,
    locale: LocaleConfig,
}

impl AuditControls {
    /// Maximum pages fetched while looking for the declaration.
    pub fn crawl_budget(&self) -> usize {
        self.crawl_budget
    }

    /// Fuzzy threshold for matching declaration headings.
    pub fn structure_threshold(&self) -> f64 {
        self.structure_threshold
    }

    /// Fuzzy threshold for level-offset detection.
    pub fn offset_threshold(&self) -> f64 {
        self.offset_threshold
    }

    /// Fuzzy threshold used by the crawl's page-acceptance test.
    pub fn acceptance_threshold(&self) -> f64 {
        self.acceptance_threshold
    }

    /// Canonical headings a page needs before the crawl accepts it.
    pub fn min_matching_headings(&self) -> usize {
        self.min_matching_headings
    }

    /// User agent for HTTP requests.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Redirect hops followed per request.
    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    /// Pages kept in the fetch cache.
    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }

    /// Lifetime of a cached page.
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }

    /// Month tables for date extraction.
    pub fn locale(&self) -> &LocaleConfig {
        &self.locale
    }

    /// Overrides the crawl budget.
    pub fn with_crawl_budget(mut self, budget: usize) -> Self {
        self.crawl_budget = budget;
        self
    }

    /// Overrides the heading-structure thresholds.
    pub fn with_structure_thresholds(mut self, offset: f64, structure: f64) -> Self {
        self.offset_threshold = offset;
        self.structure_threshold = structure;
        self
    }

    /// Overrides the crawl acceptance test.
    pub fn with_acceptance(mut self, threshold: f64, min_matching_headings: usize) -> Self {
        self.acceptance_threshold = threshold;
        self.min_matching_headings = min_matching_headings;
        self
    }

    /// Overrides the locale tables.
    pub fn with_locale(mut self, locale: LocaleConfig) -> Self {
        self.locale = locale;
        self
    }
}

impl Default for AuditControls {
    fn default() -> Self {
        Self {
            crawl_budget: DEFAULT_CRAWL_BUDGET,
            structure_threshold: DEFAULT_MATCH_THRESHOLD,
            offset_threshold: DEFAULT_MATCH_THRESHOLD,
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            min_matching_headings: DEFAULT_MIN_MATCHING_HEADINGS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(10),
            max_redirects: 5,
            cache_capacity: 64,
            cache_ttl: Duration::from_secs(300),
            locale: LocaleConfig::default(),
        }
    }
}

/// Command-line interface of the audit binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "a11y_audit", about = "Audit a site's accessibility declaration")]
pub struct Cli {
    /// Homepage of the site to audit
    pub url: String,

    /// Maximum pages fetched while looking for the declaration
    #[arg(long, env = "A11YCRAWL_BUDGET", default_value_t = DEFAULT_CRAWL_BUDGET)]
    pub budget: usize,

    /// Fuzzy threshold for heading-structure matching
    #[arg(long, env = "A11YCRAWL_STRUCTURE_THRESHOLD", default_value_t = DEFAULT_MATCH_THRESHOLD)]
    pub structure_threshold: f64,

    /// Fuzzy threshold for heading level-offset detection
    #[arg(long, env = "A11YCRAWL_OFFSET_THRESHOLD", default_value_t = DEFAULT_MATCH_THRESHOLD)]
    pub offset_threshold: f64,

    /// Fuzzy threshold for accepting a crawled page as the declaration
    #[arg(long, env = "A11YCRAWL_ACCEPTANCE_THRESHOLD", default_value_t = DEFAULT_ACCEPTANCE_THRESHOLD)]
    pub acceptance_threshold: f64,

    /// Canonical headings a page needs to be accepted as the declaration
    #[arg(long, env = "A11YCRAWL_MIN_HEADINGS", default_value_t = DEFAULT_MIN_MATCHING_HEADINGS)]
    pub min_headings: usize,

    /// User agent sent with every request
    #[arg(long, env = "A11YCRAWL_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Request timeout in seconds
    #[arg(long, env = "A11YCRAWL_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout_secs: u64,

    /// Redirect hops followed per request
    #[arg(long, env = "A11YCRAWL_MAX_REDIRECTS", default_value_t = 5)]
    pub max_redirects: usize,

    /// Pages kept in the fetch cache
    #[arg(long, env = "A11YCRAWL_CACHE_CAPACITY", default_value_t = 64)]
    pub cache_capacity: usize,

    /// Seconds a cached page stays fresh
    #[arg(long, env = "A11YCRAWL_CACHE_TTL_SECS", default_value_t = 300)]
    pub cache_ttl_secs: u64,

    /// Write the transition ledger as JSON lines to this file
    #[arg(long, env = "A11YCRAWL_LEDGER_OUTPUT")]
    pub ledger_output: Option<std::path::PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "A11YCRAWL_LOG_JSON", default_value_t = false)]
    pub log_json: bool,

    /// Default log level when RUST_LOG is unset
    #[arg(long, env = "A11YCRAWL_LOG_LEVEL", default_value = "info")]
    pub log_level: tracing::Level,
}

impl Cli {
    /// Converts the parsed CLI into `AuditControls`.
    pub fn build_controls(&self) -> AuditControls {
        AuditControls {
            crawl_budget: self.budget,
            structure_threshold: self.structure_threshold,
            offset_threshold: self.offset_threshold,
            acceptance_threshold: self.acceptance_threshold,
            min_matching_headings: self.min_headings,
            user_agent: self.user_agent.clone(),
            request_timeout: Duration::from_secs(self.timeout_secs),
            max_redirects: self.max_redirects,
            cache_capacity: self.cache_capacity,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            locale: LocaleConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cli_defaults_match_controls_defaults() {
        let cli = Cli::parse_from(["a11y_audit", "https://site.test/"]);
        assert_eq!(cli.build_controls(), AuditControls::default());
        assert_eq!(cli.ledger_output, None);
    }

    #[test]
    fn cli_overrides_are_applied() {
        let cli = Cli::parse_from([
            "a11y_audit",
            "https://site.test/",
            "--budget",
            "9",
            "--min-headings",
            "4",
            "--timeout-secs",
            "3",
        ]);
        let controls = cli.build_controls();
        assert_eq!(controls.crawl_budget(), 9);
        assert_eq!(controls.min_matching_headings(), 4);
        assert_eq!(controls.request_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn default_user_agent_names_the_crate_version() {
        assert_eq!(
            DEFAULT_USER_AGENT,
            format!("a11ycrawl/{}", env!("CARGO_PKG_VERSION"))
        );
        assert_eq!(AuditControls::default().user_agent(), DEFAULT_USER_AGENT);
    }

    #[test]
    fn locale_lookup_is_case_insensitive() {
        let locale = LocaleConfig::default();
        assert_eq!(locale.month("Août"), Some(8));
        assert_eq!(locale.month("DECEMBER"), Some(12));
        assert_eq!(locale.month("brumaire"), None);
        let custom = LocaleConfig::empty().with_month("Brumaire", 11);
        assert_eq!(custom.month("brumaire"), Some(11));
        assert_eq!(custom.month_names().count(), 1);
    }
}
