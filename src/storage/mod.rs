//! Chart persistence interface.
//!
//! The scraping engine consumes storage through [`ChartStore`], which covers
//! the whole operation surface the orchestrator, the run summary and the
//! tests need. The backing implementation here is the in-memory
//! [`MemoryStore`]; a relational backend would implement the same trait.

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::ScrapeResult;
use crate::models::{ItemRecord, NewWeek, PreviousRank, Source, SourceType, Week, YearGroup};

pub mod memory;

pub use memory::MemoryStore;

/// Async storage operations for chart data.
///
/// `insert_week` is the only write: it commits one chart date — the Week,
/// its Items and any missing Title/Author/Publisher rows — as a single
/// all-or-nothing unit, rejecting a duplicate `(date, source_type)`.
#[async_trait]
pub trait ChartStore: Send + Sync {
    /// Every seeded ranking source.
    async fn sources(&self) -> ScrapeResult<Vec<Source>>;

    /// Look up a (source, cadence) pair by names.
    async fn source_type(
        &self,
        source_name: &str,
        type_name: &str,
    ) -> ScrapeResult<Option<SourceType>>;

    /// The week for `date` under a source type, if ingested.
    async fn week(&self, date: NaiveDate, source_type_id: Uuid) -> ScrapeResult<Option<Week>>;

    /// Date of the most recently ingested week for a source type.
    async fn last_week_date(&self, source_type_id: Uuid) -> ScrapeResult<Option<NaiveDate>>;

    /// The nearest ingested week strictly before `date`.
    async fn previous_week(
        &self,
        date: NaiveDate,
        source_type_id: Uuid,
    ) -> ScrapeResult<Option<Week>>;

    /// Ingested dates grouped year → month → days, for the run summary.
    async fn weeks_grouped(
        &self,
        source_name: &str,
        type_name: &str,
    ) -> ScrapeResult<Vec<YearGroup>>;

    /// Rank movement for `title_name` between the given previous week and a
    /// current rank. `None` when the title was not charted that week.
    async fn previous_rank(
        &self,
        previous_week_id: Uuid,
        current_rank: u32,
        title_name: &str,
    ) -> ScrapeResult<Option<PreviousRank>>;

    /// Items of one ingested week, joined with their entity names.
    async fn items(&self, date: NaiveDate, source_type_id: Uuid) -> ScrapeResult<Vec<ItemRecord>>;

    /// Atomically persist one chart date. Returns the new week's id.
    async fn insert_week(&self, week: NewWeek) -> ScrapeResult<Uuid>;
}
