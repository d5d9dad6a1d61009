//! Heuristics specific to French accessibility declarations: steering the
//! crawl toward the declaration page, recognising it, and pulling the
//! announced compliance figures out of its text.

use crate::controls::LocaleConfig;
use crate::crawler::CrawlStrategy;
use crate::frontier::LinkQueue;
use crate::headings::{canonical, ExpectedHeading, HeadingComparator, DECLARATION_OUTLINE};
use crate::link::Link;
use crate::page::Page;
use crate::similarity::{partial_ratio, SimilarityError};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

/// Default similarity needed for a page heading to count toward acceptance.
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f64 = 0.6;
/// Default number of canonical headings a page must show to be accepted.
pub const DEFAULT_MIN_MATCHING_HEADINGS: usize = 3;

const DECLARATION_TITLE: &str = "déclaration d'accessibilité";
const TITLE_LINK_THRESHOLD: f64 = 0.8;

const DECLARATION_SLUGS: &[&str] = &[
    "declaration-accessibilite",
    "declaration-d-accessibilite",
    "declaration_accessibilite",
    "accessibility-statement",
];
const ACCESSIBILITY_HINTS: &[&str] = &["accessib", "a11y", "rgaa"];

const SKIPPED_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "odt", "rtf", "xls", "xlsx", "ods", "csv", "ppt", "pptx", "odp", "zip",
    "gz", "rar", "jpg", "jpeg", "png", "gif", "svg", "webp", "mp3", "mp4", "avi", "xml", "json",
];

const AUDIT_KEYWORDS: &[&str] = &[
    "audit",
    "évaluation",
    "evaluation",
    "réalisé",
    "realise",
    "effectué",
    "effectue",
    "vérification",
    "conducted",
    "carried out",
];
/// Characters scanned before a date when looking for an audit keyword.
const DATE_CONTEXT_CHARS: usize = 160;
/// Characters scanned after "taux de conformité" for a percentage.
const RATE_CONTEXT_CHARS: usize = 300;

/// Errors raised while building declaration extractors.
#[derive(Debug, Error)]
pub enum DeclarationError {
    /// A locale-derived pattern failed to compile.
    #[error("invalid locale pattern: {0}")]
    Pattern(#[from] regex::Error),
    /// Acceptance threshold out of range.
    #[error(transparent)]
    Threshold(#[from] SimilarityError),
}

/// Compliance level a site announces for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceStatus {
    /// "totalement conforme".
    Full,
    /// "partiellement conforme".
    Partial,
    /// "non conforme".
    #[serde(rename = "none")]
    NonCompliant,
}

/// Finds declaration pages: scores links, steers the queue, and accepts a
/// page once enough canonical headings show up in it.
#[derive(Debug, Clone)]
pub struct DeclarationStrategy {
    comparator: HeadingComparator,
    min_matching_headings: usize,
    outline: &'static [ExpectedHeading],
}

impl Default for DeclarationStrategy {
    fn default() -> Self {
        Self {
            comparator: HeadingComparator::new(
                DEFAULT_ACCEPTANCE_THRESHOLD,
                DEFAULT_ACCEPTANCE_THRESHOLD,
            )
            .unwrap_or_default(),
            min_matching_headings: DEFAULT_MIN_MATCHING_HEADINGS,
            outline: DECLARATION_OUTLINE,
        }
    }
}

impl DeclarationStrategy {
    /// Strategy accepting pages where at least `min_matching_headings`
    /// canonical headings match at `threshold`.
    pub fn new(threshold: f64, min_matching_headings: usize) -> Result<Self, DeclarationError> {
        Ok(Self {
            comparator: HeadingComparator::new(threshold, threshold)?,
            min_matching_headings,
            outline: DECLARATION_OUTLINE,
        })
    }

    /// Replaces the outline headings are matched against.
    pub fn with_outline(mut self, outline: &'static [ExpectedHeading]) -> Self {
        self.outline = outline;
        self
    }

    /// Number of outline headings `page` matches.
    pub fn matching_headings(&self, page: &Page) -> usize {
        self.comparator.matched_count(self.outline, page.headings())
    }

    /// Weighted count of declaration signals carried by a link.
    pub fn link_score(link: &Link) -> u32 {
        let text = canonical(link.text()).to_lowercase();
        let href = link.href().to_lowercase();

        let mut score = 0;
        if !text.is_empty() && partial_ratio(&text, DECLARATION_TITLE, true) >= TITLE_LINK_THRESHOLD {
            score += 10;
        } else if text.contains("accessibilit") || text.contains("accessibility") {
            score += 5;
        }
        if DECLARATION_SLUGS.iter().any(|slug| href.contains(slug)) {
            score += 8;
        } else if ACCESSIBILITY_HINTS.iter().any(|hint| href.contains(hint)) {
            score += 3;
        }
        score
    }
}

impl CrawlStrategy for DeclarationStrategy {
    fn accepts(&self, page: &Page) -> bool {
        self.matching_headings(page) >= self.min_matching_headings
    }

    fn reprioritize(&self, _page: &Page, mut queue: LinkQueue) -> LinkQueue {
        queue.filter(|link| !has_skipped_extension(link));
        queue.reorder(|left, right| Self::link_score(right).cmp(&Self::link_score(left)));
        queue
    }
}

fn has_skipped_extension(link: &Link) -> bool {
    let path = link.url().path();
    let Some(segment) = path.rsplit('/').next() else {
        return false;
    };
    segment
        .rsplit_once('.')
        .map(|(_, extension)| {
            let extension = extension.to_ascii_lowercase();
            SKIPPED_EXTENSIONS.contains(&extension.as_str())
        })
        .unwrap_or(false)
}

fn status_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)accessibilit[ée]\s*:\s*(totalement|partiellement|non)\s+conforme")
            .expect("status pattern")
    })
}

fn rate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d{1,3}(?:[.,]\d{1,2})?)\s*%").expect("rate pattern"))
}

fn rate_anchor() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)taux\s+(?:global\s+)?de\s+conformit[ée]|crit[èe]res\s+(?:du\s+)?rgaa\s+(?:sont\s+)?respect[ée]s")
            .expect("rate anchor")
    })
}

fn numeric_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("numeric date pattern")
    })
}

/// Compliance status announced in `text` ("Accessibilité : partiellement conforme").
pub fn compliance_status(text: &str) -> Option<ComplianceStatus> {
    let captures = status_pattern().captures(text)?;
    match captures.get(1)?.as_str().to_lowercase().as_str() {
        "totalement" => Some(ComplianceStatus::Full),
        "partiellement" => Some(ComplianceStatus::Partial),
        "non" => Some(ComplianceStatus::NonCompliant),
        _ => None,
    }
}

/// Compliance percentage announced near "taux de conformité" (0-100).
pub fn compliance_rate(text: &str) -> Option<f64> {
    rate_anchor().find_iter(text).find_map(|anchor| {
        let window: String = text[anchor.end()..].chars().take(RATE_CONTEXT_CHARS).collect();
        rate_pattern()
            .captures(&window)
            .and_then(|captures| captures.get(1))
            .and_then(|value| value.as_str().replace(',', ".").parse::<f64>().ok())
            .filter(|rate| (0.0..=100.0).contains(rate))
    })
}

/// Locale-driven extraction of the date an audit was carried out.
#[derive(Debug, Clone)]
pub struct AuditDateExtractor {
    locale: LocaleConfig,
    day_first: Regex,
    month_first: Regex,
}

impl AuditDateExtractor {
    /// Compiles date patterns from the locale's month names.
    pub fn new(locale: &LocaleConfig) -> Result<Self, DeclarationError> {
        let mut names: Vec<&str> = locale.month_names().collect();
        names.sort_by_key(|name| std::cmp::Reverse(name.chars().count()));
        let alternation = names
            .iter()
            .map(|name| regex::escape(name))
            .collect::<Vec<_>>()
            .join("|");

        let day_first = Regex::new(&format!(
            r"(?i)\b(\d{{1,2}})(?:er|st|nd|rd|th)?\s+({alternation})\s+(\d{{4}})\b"
        ))?;
        let month_first = Regex::new(&format!(
            r"(?i)\b({alternation})\s+(\d{{1,2}})(?:st|nd|rd|th)?,?\s+(\d{{4}})\b"
        ))?;
        Ok(Self {
            locale: locale.clone(),
            day_first,
            month_first,
        })
    }

    /// Every date found in `text`, with its byte offset, in text order.
    pub fn dates(&self, text: &str) -> Vec<(usize, NaiveDate)> {
        let mut found = Vec::new();
        for captures in self.day_first.captures_iter(text) {
            let (Some(all), Some(day), Some(month), Some(year)) =
                (captures.get(0), captures.get(1), captures.get(2), captures.get(3))
            else {
                continue;
            };
            if let Some(date) = self.build(year.as_str(), self.locale.month(month.as_str()), day.as_str()) {
                found.push((all.start(), date));
            }
        }
        for captures in self.month_first.captures_iter(text) {
            let (Some(all), Some(month), Some(day), Some(year)) =
                (captures.get(0), captures.get(1), captures.get(2), captures.get(3))
            else {
                continue;
            };
            if let Some(date) = self.build(year.as_str(), self.locale.month(month.as_str()), day.as_str()) {
                found.push((all.start(), date));
            }
        }
        for captures in numeric_date_pattern().captures_iter(text) {
            let (Some(all), Some(day), Some(month), Some(year)) =
                (captures.get(0), captures.get(1), captures.get(2), captures.get(3))
            else {
                continue;
            };
            let month = month.as_str().parse::<u32>().ok();
            if let Some(date) = self.build(year.as_str(), month, day.as_str()) {
                found.push((all.start(), date));
            }
        }
        found.sort_by_key(|(offset, _)| *offset);
        found.dedup_by_key(|(offset, _)| *offset);
        found
    }

    /// The first date preceded by an audit keyword, else the first date at all.
    pub fn audit_date(&self, text: &str) -> Option<NaiveDate> {
        let dates = self.dates(text);
        dates
            .iter()
            .find(|(offset, _)| {
                let context = preceding_chars(text, *offset, DATE_CONTEXT_CHARS).to_lowercase();
                AUDIT_KEYWORDS.iter().any(|keyword| context.contains(keyword))
            })
            .or_else(|| dates.first())
            .map(|(_, date)| *date)
    }

    fn build(&self, year: &str, month: Option<u32>, day: &str) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(year.parse().ok()?, month?, day.parse().ok()?)
    }
}

fn preceding_chars(text: &str, end: usize, count: usize) -> &str {
    let head = &text[..end];
    let start = head
        .char_indices()
        .rev()
        .nth(count.saturating_sub(1))
        .map_or(0, |(index, _)| index);
    &head[start..]
}
