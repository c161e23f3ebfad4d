//! Fuzzy candidate ranking shared by the auxiliary resolvers.
//!
//! Every resolver search produces a list of [`CandidateEntry`] values; the
//! best one is picked by Levenshtein distance between the query title and
//! the candidate title. Candidates are compared lower-cased, and the
//! candidate is truncated to the query's character length first: search
//! result titles drag long suffixes ("Vol. 12 (Japanese Edition)") that
//! would otherwise dominate the distance.

use chrono::{Months, NaiveDate};

/// One search result row, extracted before any ranking happens.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEntry {
    /// Position in the search result list, 0-based.
    pub index: usize,
    /// Title text as displayed by the search page.
    pub title: String,
    /// Volume parsed out of the title, when present.
    pub volume: Option<u32>,
    /// Absolute link to the candidate's detail page.
    pub link: String,
    /// Publication date parsed out of the result row, when present.
    pub publication_date: Option<NaiveDate>,
}

/// Unit-cost Levenshtein distance over Unicode code points.
///
/// Code-point granularity keeps the metric meaningful for Japanese titles,
/// where byte-level comparison would overweight multi-byte characters.
pub fn lev_dist(left: &str, right: &str) -> usize {
    strsim::levenshtein(left, right)
}

/// Pick the candidate whose title is closest to `query`.
///
/// Ties keep the earliest candidate. Returns `None` only for an empty slice.
pub fn closest_candidate<'a>(
    query: &str,
    candidates: &'a [CandidateEntry],
) -> Option<&'a CandidateEntry> {
    let needle = query.to_lowercase();
    let span = query.chars().count();
    let mut best: Option<(&CandidateEntry, usize)> = None;
    for candidate in candidates {
        let haystack: String = candidate.title.to_lowercase().chars().take(span).collect();
        let distance = lev_dist(&needle, &haystack);
        match best {
            Some((_, lowest)) if distance >= lowest => {}
            _ => best = Some((candidate, distance)),
        }
    }
    best.map(|(candidate, _)| candidate)
}

/// Volume filter: both sides knowing a volume and disagreeing rejects the
/// candidate; a missing side is not held against it.
pub fn volume_matches(expected: Option<u32>, candidate: Option<u32>) -> bool {
    match (expected, candidate) {
        (Some(want), Some(have)) => want == have,
        _ => true,
    }
}

/// Publication-date filter: the candidate must fall within ±2 months of the
/// expected date when both are known.
pub fn within_publication_window(expected: Option<NaiveDate>, candidate: Option<NaiveDate>) -> bool {
    let (Some(want), Some(have)) = (expected, candidate) else {
        return true;
    };
    let low = want.checked_sub_months(Months::new(2)).unwrap_or(want);
    let high = want.checked_add_months(Months::new(2)).unwrap_or(want);
    low <= have && have <= high
}
