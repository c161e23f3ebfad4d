//! Data structures for scraped chart entries and stored records.
//!
//! This module defines the core data structures used throughout the application:
//! - [`Content`]: the transient unit a scraper produces for one ranked title
//! - [`PreviousRank`]: rank movement against the previous week's chart
//! - Store records: [`Source`], [`SourceType`], [`Week`], [`NewWeek`]
//! - Reporting shapes: [`ItemRecord`], [`YearGroup`], [`MonthGroup`]

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One ranked entry scraped from a chart page, fully resolved.
///
/// `name` is the display title recovered from the auxiliary resolver; when
/// resolution fails it carries the original source-language title instead,
/// with empty author/publisher lists.
///
/// # Invariant
///
/// `rating` is always populated: a rank that cannot be parsed degrades to
/// the entry's 1-based list position.
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    /// Resolved display title, or the original title on resolver failure.
    pub name: String,
    /// Volume number, when one could be recovered from any source.
    pub volume: Option<u32>,
    /// Saved cover filename (`{uuid}.{ext}`), when one could be fetched.
    pub image: Option<String>,
    /// Author names in resolver order. May be empty.
    pub authors: Vec<String>,
    /// Publisher names in resolver order. May be empty.
    pub publishers: Vec<String>,
    /// Publication date of the ranked volume.
    pub release_date: Option<NaiveDate>,
    /// Chart position, 1-based.
    pub rating: u32,
    /// Estimated copies sold for the week. The blog source never reports it.
    pub sold: Option<u64>,
}

/// Movement of a title relative to the previous week's chart.
///
/// A numerically smaller rating than last week (2 → 1) is an improvement
/// and evaluates to `Up`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum PreviousRank {
    Up = 2,
    Same = 1,
    Down = 0,
}

/// A ranking publisher, seeded once per deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub id: Uuid,
    /// Publisher name ("Oricon", "Shoseki").
    pub name: String,
}

/// A (source, cadence) pair such as ("Oricon", "Weekly").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceType {
    pub id: Uuid,
    pub source_id: Uuid,
    /// Cadence name ("Weekly").
    pub name: String,
}

/// One chart snapshot: a calendar date under a source type.
///
/// Unique on `(source_type_id, date)`; created exactly once per successfully
/// ingested chart date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Week {
    pub id: Uuid,
    pub source_type_id: Uuid,
    pub date: NaiveDate,
}

/// The atomic unit handed to the store: every entry for one chart date.
#[derive(Debug, Clone)]
pub struct NewWeek {
    pub source_type_id: Uuid,
    pub date: NaiveDate,
    /// Entries in chart order (rating ascending within each page).
    pub entries: Vec<Content>,
}

/// A stored item joined with its title, author and publisher names.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub id: Uuid,
    pub week_id: Uuid,
    pub title: String,
    pub volume: Option<u32>,
    pub image: Option<String>,
    pub authors: Vec<String>,
    pub publishers: Vec<String>,
    pub release_date: Option<NaiveDate>,
    pub rating: u32,
    pub sold: Option<u64>,
    /// Movement against the same title's rating in the preceding week.
    pub previous_rank: Option<PreviousRank>,
}

/// Ingested chart dates for one source, grouped for the run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearGroup {
    pub year: i32,
    pub months: Vec<MonthGroup>,
}

/// Days of one month that have an ingested chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthGroup {
    /// English month name ("January").
    pub name: String,
    pub days: Vec<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_previous_rank_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&PreviousRank::Up).unwrap(), "\"UP\"");
        assert_eq!(serde_json::to_string(&PreviousRank::Same).unwrap(), "\"SAME\"");
        assert_eq!(serde_json::to_string(&PreviousRank::Down).unwrap(), "\"DOWN\"");
    }

    #[test]
    fn test_previous_rank_round_trips() {
        let rank: PreviousRank = serde_json::from_str("\"DOWN\"").unwrap();
        assert_eq!(rank, PreviousRank::Down);
    }

    #[test]
    fn test_previous_rank_discriminants() {
        assert_eq!(PreviousRank::Up as u8, 2);
        assert_eq!(PreviousRank::Same as u8, 1);
        assert_eq!(PreviousRank::Down as u8, 0);
    }
}
