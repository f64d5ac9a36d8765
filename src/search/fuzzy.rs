//! Subsequence fuzzy matching for file and folder names.

#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyMatch {
    /// In `(0, 1]`; higher is better.
    pub score: f64,
    /// Char indices in the candidate that matched the query.
    pub positions: Vec<usize>,
}

pub trait FuzzyMatcher: Send + Sync {
    fn score(&self, query: &str, candidate: &str) -> Option<FuzzyMatch>;
}

/// Every non-space query char must appear in the candidate in order.
/// Consecutive runs and word-start hits score higher; so do shorter candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubsequenceMatcher;

const CONSECUTIVE_BONUS: f64 = 1.0;
const BOUNDARY_BONUS: f64 = 0.5;
const BEST_PER_CHAR: f64 = 1.0 + CONSECUTIVE_BONUS;

impl FuzzyMatcher for SubsequenceMatcher {
    fn score(&self, query: &str, candidate: &str) -> Option<FuzzyMatch> {
        let needle: Vec<char> = query
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();
        if needle.is_empty() {
            return None;
        }
        let hay: Vec<char> = candidate.chars().collect();
        let lower: Vec<char> = hay
            .iter()
            .map(|c| c.to_lowercase().next().unwrap_or(*c))
            .collect();

        let mut positions = Vec::with_capacity(needle.len());
        let mut raw = 0.0;
        let mut from = 0;
        for &q in &needle {
            let pos = (from..lower.len()).find(|&i| lower[i] == q)?;
            raw += 1.0;
            if positions.last().is_some_and(|&prev| prev + 1 == pos) {
                raw += CONSECUTIVE_BONUS;
            }
            if pos == 0 || !hay[pos - 1].is_alphanumeric() {
                raw += BOUNDARY_BONUS;
            }
            positions.push(pos);
            from = pos + 1;
        }

        // ideal: one contiguous run starting at a word boundary
        let best = BEST_PER_CHAR * needle.len() as f64 - CONSECUTIVE_BONUS + BOUNDARY_BONUS;
        let quality = (raw / best).min(1.0);
        let coverage = needle.len() as f64 / lower.len() as f64;
        Some(FuzzyMatch {
            score: (0.7 * quality + 0.3 * coverage).min(1.0),
            positions,
        })
    }
}

/// Last path segment without a `.md` extension.
pub fn display_name(path: &str) -> &str {
    let base = path.rsplit('/').next().unwrap_or(path);
    base.strip_suffix(".md").unwrap_or(base)
}

/// Best of matching the display name and the full path.
pub fn best_of_name_and_path(
    matcher: &dyn FuzzyMatcher,
    query: &str,
    path: &str,
) -> Option<FuzzyMatch> {
    let by_name = matcher.score(query, display_name(path));
    let by_path = matcher.score(query, path);
    match (by_name, by_path) {
        (Some(a), Some(b)) => Some(if a.score >= b.score { a } else { b }),
        (a, b) => a.or(b),
    }
}
