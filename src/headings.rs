//! Fuzzy, order-aware comparison of a page outline against the canonical
//! accessibility-declaration outline.

use crate::page::{collapse_whitespace, Heading};
use crate::similarity::{partial_ratio, similarity_ratio, SimilarityError};
use serde::{Deserialize, Serialize};

/// Default fuzzy threshold for both offset detection and heading matching.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.65;

/// One entry of a canonical outline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExpectedHeading {
    /// Expected depth (1-6).
    pub level: u8,
    /// Canonical heading text.
    pub text: &'static str,
}

impl ExpectedHeading {
    /// Builds an outline entry.
    pub const fn new(level: u8, text: &'static str) -> Self {
        Self { level, text }
    }
}

/// Canonical outline of a French (RGAA) accessibility declaration.
pub const DECLARATION_OUTLINE: &[ExpectedHeading] = &[
    ExpectedHeading::new(1, "Déclaration d'accessibilité"),
    ExpectedHeading::new(2, "État de conformité"),
    ExpectedHeading::new(3, "Résultats des tests"),
    ExpectedHeading::new(2, "Contenus non accessibles"),
    ExpectedHeading::new(3, "Non-conformités"),
    ExpectedHeading::new(3, "Dérogations pour charge disproportionnée"),
    ExpectedHeading::new(3, "Contenus non soumis à l'obligation d'accessibilité"),
    ExpectedHeading::new(2, "Établissement de cette déclaration d'accessibilité"),
    ExpectedHeading::new(3, "Technologies utilisées pour la réalisation du site"),
    ExpectedHeading::new(3, "Environnement de test"),
    ExpectedHeading::new(3, "Outils pour évaluer l'accessibilité"),
    ExpectedHeading::new(
        3,
        "Pages du site ayant fait l'objet de la vérification de conformité",
    ),
    ExpectedHeading::new(2, "Retour d'information et contact"),
    ExpectedHeading::new(2, "Voies de recours"),
];

/// Outcome for a single expected heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadingStatus {
    /// Present, in order, at the expected (offset-adjusted) level.
    Ok,
    /// No page heading matched.
    Missing,
    /// Matched, but placed before a heading that should precede it.
    IncorrectOrder,
    /// Matched and in order, at the wrong level.
    IncorrectLevel,
}

/// Verdict for one expected heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingVerdict {
    /// Canonical text.
    pub expected_heading: String,
    /// Canonical level.
    pub expected_level: u8,
    /// Classification.
    pub status: HeadingStatus,
    /// Page heading claimed for this entry.
    pub actual_heading: Option<Heading>,
}

/// Severity band for a comparison score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Score of at least 90.
    Success,
    /// Score in `[60, 90)`.
    Warning,
    /// Score below 60.
    Error,
}

impl Severity {
    /// Band for a 0-100 score.
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::Success
        } else if score >= 60.0 {
            Self::Warning
        } else {
            Self::Error
        }
    }
}

/// Full result of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadingComparison {
    /// One verdict per expected heading, in canonical order.
    pub verdicts: Vec<HeadingVerdict>,
    /// Uniform level shift detected between page and outline.
    pub level_offset: i16,
    /// Percentage of `ok` verdicts.
    pub score: f64,
    /// Band for `score`.
    pub severity: Severity,
}

impl HeadingComparison {
    /// Number of non-`ok` verdicts.
    pub fn failures(&self) -> usize {
        self.verdicts
            .iter()
            .filter(|verdict| verdict.status != HeadingStatus::Ok)
            .count()
    }

    /// Verdicts with the given status.
    pub fn with_status(&self, status: HeadingStatus) -> impl Iterator<Item = &HeadingVerdict> {
        self.verdicts
            .iter()
            .filter(move |verdict| verdict.status == status)
    }
}

/// Compares page headings with an expected outline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadingComparator {
    offset_threshold: f64,
    match_threshold: f64,
}

impl Default for HeadingComparator {
    fn default() -> Self {
        Self {
            offset_threshold: DEFAULT_MATCH_THRESHOLD,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

impl HeadingComparator {
    /// Builds a comparator; both thresholds must lie in `(0, 1]`.
    pub fn new(offset_threshold: f64, match_threshold: f64) -> Result<Self, SimilarityError> {
        for threshold in [offset_threshold, match_threshold] {
            if !(threshold > 0.0 && threshold <= 1.0) {
                return Err(SimilarityError::InvalidThreshold(threshold));
            }
        }
        Ok(Self {
            offset_threshold,
            match_threshold,
        })
    }

    /// Scores `actual` (document order) against `expected` (canonical order).
    pub fn compare(&self, expected: &[ExpectedHeading], actual: &[Heading]) -> HeadingComparison {
        let actual_texts: Vec<String> = actual.iter().map(|heading| canonical(&heading.text)).collect();
        let offset = self.offset_from(expected, actual, &actual_texts);
        let claims = self.claims_from(expected, &actual_texts);
        let in_order = ordered_chain(&claims);

        let verdicts: Vec<HeadingVerdict> = expected
            .iter()
            .zip(claims.iter().zip(in_order.iter()))
            .map(|(heading, (claim, ordered))| {
                let status = match claim {
                    None => HeadingStatus::Missing,
                    Some(_) if !ordered => HeadingStatus::IncorrectOrder,
                    Some(index) if i16::from(actual[*index].level) != i16::from(heading.level) + offset => {
                        HeadingStatus::IncorrectLevel
                    }
                    Some(_) => HeadingStatus::Ok,
                };
                HeadingVerdict {
                    expected_heading: heading.text.to_string(),
                    expected_level: heading.level,
                    status,
                    actual_heading: claim.map(|index| actual[index].clone()),
                }
            })
            .collect();

        let total = verdicts.len();
        let failures = verdicts
            .iter()
            .filter(|verdict| verdict.status != HeadingStatus::Ok)
            .count();
        let score = if total == 0 {
            100.0
        } else {
            (total - failures) as f64 / total as f64 * 100.0
        };

        HeadingComparison {
            verdicts,
            level_offset: offset,
            score,
            severity: Severity::from_score(score),
        }
    }

    /// Level shift of the best-matching expected/actual pair, or 0 when no
    /// pair clears the offset threshold.
    pub fn level_offset(&self, expected: &[ExpectedHeading], actual: &[Heading]) -> i16 {
        let actual_texts: Vec<String> = actual.iter().map(|heading| canonical(&heading.text)).collect();
        self.offset_from(expected, actual, &actual_texts)
    }

    /// Number of expected headings that claim some page heading, ignoring order and level.
    pub fn matched_count(&self, expected: &[ExpectedHeading], actual: &[Heading]) -> usize {
        let actual_texts: Vec<String> = actual.iter().map(|heading| canonical(&heading.text)).collect();
        self.claims_from(expected, &actual_texts)
            .iter()
            .filter(|claim| claim.is_some())
            .count()
    }

    fn offset_from(&self, expected: &[ExpectedHeading], actual: &[Heading], actual_texts: &[String]) -> i16 {
        let mut best: Option<(f64, i16)> = None;
        for heading in expected {
            let expected_text = canonical(heading.text);
            for (candidate, text) in actual.iter().zip(actual_texts) {
                let ratio = similarity_ratio(text, &expected_text, true);
                if ratio < self.offset_threshold {
                    continue;
                }
                if best.map_or(true, |(score, _)| ratio > score) {
                    best = Some((ratio, i16::from(candidate.level) - i16::from(heading.level)));
                }
            }
        }
        best.map_or(0, |(_, offset)| offset)
    }

    /// Greedy pass: each expected heading claims its best unused page heading.
    fn claims_from(&self, expected: &[ExpectedHeading], actual_texts: &[String]) -> Vec<Option<usize>> {
        let mut used = vec![false; actual_texts.len()];
        expected
            .iter()
            .map(|heading| {
                let expected_text = canonical(heading.text);
                let mut best: Option<(f64, usize)> = None;
                for (index, text) in actual_texts.iter().enumerate() {
                    if used[index] {
                        continue;
                    }
                    let ratio = partial_ratio(text, &expected_text, true);
                    if ratio >= self.match_threshold && best.map_or(true, |(score, _)| ratio > score) {
                        best = Some((ratio, index));
                    }
                }
                let claimed = best.map(|(_, index)| index);
                if let Some(index) = claimed {
                    used[index] = true;
                }
                claimed
            })
            .collect()
    }
}

/// Marks which claims belong to the longest chain of matches that appears in
/// canonical order in the document. Among equally long chains the one ending
/// earliest in the document wins, so a single displaced heading is the one
/// flagged.
fn ordered_chain(claims: &[Option<usize>]) -> Vec<bool> {
    let matched: Vec<(usize, usize)> = claims
        .iter()
        .enumerate()
        .filter_map(|(expected, claim)| claim.map(|actual| (expected, actual)))
        .collect();

    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; matched.len()];
    for (position, &(_, actual)) in matched.iter().enumerate() {
        let slot = tails.partition_point(|&tail| matched[tail].1 < actual);
        if slot > 0 {
            previous[position] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(position);
        } else {
            tails[slot] = position;
        }
    }

    let mut in_chain = vec![false; claims.len()];
    let mut cursor = tails.last().copied();
    while let Some(position) = cursor {
        in_chain[matched[position].0] = true;
        cursor = previous[position];
    }
    in_chain
}

/// Folds typographic apostrophes and whitespace so "d’accessibilité" and
/// "d'accessibilité" compare equal.
pub(crate) fn canonical(text: &str) -> String {
    let folded: String = text
        .chars()
        .map(|ch| match ch {
            '\u{2019}' | '\u{2018}' | '\u{02BC}' | '`' | '\u{00B4}' => '\'',
            '\u{2010}' | '\u{2011}' | '\u{2013}' => '-',
            other => other,
        })
        .collect();
    collapse_whitespace(&folded)
}
