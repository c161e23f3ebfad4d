//! Chart scrapers for the weekly sales-ranking sources.
//!
//! Each source gets one [`ChartScraper`] implementation built from a shared
//! [`PageFetch`](crate::fetch::PageFetch) client plus whatever resolvers its
//! pages need:
//!
//! | Source | Module | Layout | Date discovery |
//! |--------|--------|--------|----------------|
//! | Oricon | [`oricon`] | paginated HTML rank entries | probe date URLs day by day |
//! | Shoseki | [`shoseki`] | blog post, 3 text lines per entry | walk the category date index |
//!
//! Scrapers produce [`Content`] records for one chart date and never touch
//! the chart store; persistence belongs to the orchestrator.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::ScrapeResult;
use crate::models::Content;

pub mod oricon;
pub mod shoseki;

pub use oricon::OriconScraper;
pub use shoseki::ShosekiScraper;

/// Which way a date scan moves from its starting point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    /// Toward the future: resuming from the last ingested date.
    Forward,
    /// Toward the past: backfilling from today.
    Backward,
}

/// One ranking source's scraping surface.
///
/// `get_data` returns `Ok(None)` when the source has published nothing for
/// the date at all; a located list page with a broken structure is an error
/// instead. `find_latest_date` is the date-window scan: bounded, iterative,
/// and `Ok(None)` when the window is exhausted.
#[async_trait]
pub trait ChartScraper: Send + Sync {
    /// Publisher name as seeded in the chart store ("Oricon").
    fn source(&self) -> &'static str;

    /// Cadence name as seeded in the chart store ("Weekly").
    fn source_type(&self) -> &'static str;

    /// Scrape the full chart for one date.
    async fn get_data(&self, date: NaiveDate) -> ScrapeResult<Option<Vec<Content>>>;

    /// Find the nearest date with published content, moving `direction`-ward
    /// from (and excluding) `date`.
    async fn find_latest_date(
        &self,
        date: NaiveDate,
        direction: ScanDirection,
    ) -> ScrapeResult<Option<NaiveDate>>;
}
