//! Edit-distance string similarity with exact and partial (substring) matching.

use thiserror::Error;

/// Haystacks shorter than this are scanned at every offset in partial mode.
const FULL_SCAN_LIMIT: usize = 100;
/// Longer haystacks are sampled at `len / PARTIAL_SAMPLES` offsets.
const PARTIAL_SAMPLES: usize = 20;

/// Errors raised for invalid match options.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SimilarityError {
    /// `fuzzy` must lie in `(0, 1]`.
    #[error("fuzzy threshold must be in (0, 1], got {0}")]
    InvalidThreshold(f64),
}

/// How two strings are compared.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    /// Minimum ratio to count as a match; `None` requires equality (or containment in partial mode).
    pub fuzzy: Option<f64>,
    /// Treat the second string as a substring candidate of the first.
    pub partial: bool,
    /// Compare case-insensitively.
    pub ignore_case: bool,
}

impl MatchOptions {
    /// Strict, case-sensitive equality.
    pub const fn exact() -> Self {
        Self {
            fuzzy: None,
            partial: false,
            ignore_case: false,
        }
    }

    /// Sets the fuzzy threshold.
    pub const fn fuzzy(mut self, threshold: f64) -> Self {
        self.fuzzy = Some(threshold);
        self
    }

    /// Enables substring matching.
    pub const fn partial(mut self) -> Self {
        self.partial = true;
        self
    }

    /// Enables case folding.
    pub const fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    fn threshold(&self) -> Result<Option<f64>, SimilarityError> {
        match self.fuzzy {
            None => Ok(None),
            Some(value) if value > 0.0 && value <= 1.0 => Ok(Some(value)),
            Some(value) => Err(SimilarityError::InvalidThreshold(value)),
        }
    }
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self::exact()
    }
}

/// Classic Levenshtein distance over Unicode scalar values, unit costs.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    distance_chars(&a, &b)
}

fn distance_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            let deletion = previous[j + 1] + 1;
            let insertion = current[j] + 1;
            current[j + 1] = substitution.min(deletion).min(insertion);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let longest = a.len().max(b.len());
    1.0 - distance_chars(a, b) as f64 / longest as f64
}

fn fold(input: &str, ignore_case: bool) -> Vec<char> {
    if ignore_case {
        input.to_lowercase().chars().collect()
    } else {
        input.chars().collect()
    }
}

/// `1 - distance / max(len)`; 1.0 for equal strings, 0.0 when either is empty.
pub fn similarity_ratio(a: &str, b: &str, ignore_case: bool) -> f64 {
    ratio_chars(&fold(a, ignore_case), &fold(b, ignore_case))
}

/// Best ratio of `needle` against any same-length window of `haystack`.
///
/// Haystacks under 100 characters are scanned at every offset; longer ones are
/// sampled at a stride of `len / 20`. A needle at least as long as the
/// haystack falls back to [`similarity_ratio`].
pub fn partial_ratio(haystack: &str, needle: &str, ignore_case: bool) -> f64 {
    let haystack = fold(haystack, ignore_case);
    let needle = fold(needle, ignore_case);
    partial_chars(&haystack, &needle)
}

fn partial_chars(haystack: &[char], needle: &[char]) -> f64 {
    if haystack.is_empty() || needle.is_empty() {
        return 0.0;
    }
    if needle.len() >= haystack.len() {
        return ratio_chars(haystack, needle);
    }

    let last_offset = haystack.len() - needle.len();
    let stride = if haystack.len() < FULL_SCAN_LIMIT {
        1
    } else {
        (haystack.len() / PARTIAL_SAMPLES).max(1)
    };

    let mut best = 0.0f64;
    let mut offset = 0;
    loop {
        let window = &haystack[offset..offset + needle.len()];
        best = best.max(ratio_chars(window, needle));
        if best >= 1.0 || offset == last_offset {
            break;
        }
        offset = (offset + stride).min(last_offset);
    }
    best
}

/// Ratio under `options`: partial or whole-string.
pub fn score(a: &str, b: &str, options: &MatchOptions) -> Result<f64, SimilarityError> {
    options.threshold()?;
    let a = fold(a, options.ignore_case);
    let b = fold(b, options.ignore_case);
    Ok(if options.partial {
        partial_chars(&a, &b)
    } else {
        ratio_chars(&a, &b)
    })
}

/// Whether `a` matches `b` under `options`.
///
/// Without a fuzzy threshold, or with a threshold of exactly 1.0, exact mode
/// requires equality and partial mode requires `b` to occur in `a`.
pub fn matches(a: &str, b: &str, options: &MatchOptions) -> Result<bool, SimilarityError> {
    let threshold = options.threshold()?;
    let a = fold(a, options.ignore_case);
    let b = fold(b, options.ignore_case);

    match threshold {
        Some(threshold) if threshold < 1.0 => {
            let ratio = if options.partial {
                partial_chars(&a, &b)
            } else {
                ratio_chars(&a, &b)
            };
            Ok(ratio >= threshold)
        }
        _ if options.partial => Ok(!b.is_empty() && a.windows(b.len()).any(|window| window == b)),
        _ => Ok(a == b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_matches_known_values() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("accessibilité", "accessibilite"), 1);
    }

    #[test]
    fn ratio_is_reflexive_symmetric_and_bounded() {
        let samples = ["", "a", "abc", "Voies de recours", "voies de recours", "État"];
        for a in samples {
            for b in samples {
                let forward = similarity_ratio(a, b, false);
                let backward = similarity_ratio(b, a, false);
                assert_eq!(forward, backward, "asymmetric for {a:?}/{b:?}");
                assert!((0.0..=1.0).contains(&forward));
            }
            if !a.is_empty() {
                assert_eq!(similarity_ratio(a, a, false), 1.0);
            }
        }
        assert_eq!(similarity_ratio("", "", false), 0.0);
        assert_eq!(similarity_ratio("abc", "", true), 0.0);
    }

    #[test]
    fn ratio_folds_case_on_request() {
        assert_eq!(similarity_ratio("ÉTAT", "état", true), 1.0);
        assert!(similarity_ratio("ÉTAT", "état", false) < 1.0);
    }

    #[test]
    fn partial_ratio_finds_embedded_needle() {
        let haystack = "Déclaration d'accessibilité RGAA de la commune";
        assert_eq!(partial_ratio(haystack, "accessibilité", false), 1.0);
        assert!(partial_ratio(haystack, "accesibilité", false) > 0.8);
    }

    #[test]
    fn partial_ratio_samples_long_haystacks() {
        let mut haystack = "x".repeat(400);
        haystack.push_str("voies de recours");
        haystack.push_str(&"y".repeat(184));
        let score = partial_ratio(&haystack, "voies de recours", false);
        assert!((0.0..=1.0).contains(&score));
        // The final offset is always sampled.
        let tail = format!("{}{}", "z".repeat(307), "voies de recours");
        assert_eq!(partial_ratio(&tail, "voies de recours", false), 1.0);
    }

    #[test]
    fn matches_honours_thresholds() {
        let fuzzy = MatchOptions::exact().fuzzy(0.8).ignore_case();
        assert!(matches("Environnement de test", "environnement de tests", &fuzzy).unwrap());
        assert!(!matches("Environnement de test", "Voies de recours", &fuzzy).unwrap());

        let strict = MatchOptions::exact().fuzzy(1.0);
        assert!(!matches("abc", "abd", &strict).unwrap());
        assert!(matches("abc", "abc", &strict).unwrap());
        assert!(matches("abc", "abc", &MatchOptions::exact()).unwrap());
    }

    #[test]
    fn partial_without_fuzziness_requires_containment() {
        let options = MatchOptions::exact().partial().ignore_case();
        assert!(matches("Retour d'information et contact", "CONTACT", &options).unwrap());
        assert!(!matches("Retour d'information", "contacts", &options).unwrap());
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        for threshold in [0.0, -0.5, 1.5, f64::NAN] {
            let options = MatchOptions::exact().fuzzy(threshold);
            assert!(matches("a", "a", &options).is_err());
            assert!(score("a", "a", &options).is_err());
        }
    }
}
