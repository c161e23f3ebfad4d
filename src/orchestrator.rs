//! Ingestion orchestrator: the repeated "find next date → scrape → persist"
//! loop.
//!
//! One [`Orchestrator`] drives any number of scrapers, one at a time. Per
//! scraper it picks a scan direction (forward when resuming from a stored
//! last date, backward when backfilling from today), advances date by date
//! through the scraper's date scanner, skips dates whose Week already
//! exists, and persists each scraped date as a single atomic
//! [`ChartStore::insert_week`] call. A date that fails mid-ingestion gets
//! its saved cover images deleted before the error surfaces, so a retry on
//! the next run starts clean.

use chrono::{Local, NaiveDate};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{ScrapeError, ScrapeResult};
use crate::images::ImageStore;
use crate::models::NewWeek;
use crate::scrapers::{ChartScraper, ScanDirection};
use crate::storage::ChartStore;

/// How many already-ingested dates a scan may step over before giving up.
const DEFAULT_MAX_DATE_STEPS: usize = 52;

/// Drives scrape runs against one store and one image sink.
pub struct Orchestrator {
    store: Arc<dyn ChartStore>,
    images: Arc<dyn ImageStore>,
    max_date_steps: usize,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn ChartStore>, images: Arc<dyn ImageStore>) -> Self {
        Self { store, images, max_date_steps: DEFAULT_MAX_DATE_STEPS }
    }

    /// Run one scraper to exhaustion.
    ///
    /// With an explicit `start` the run ingests that date first (unless it
    /// already exists) and continues forward. Otherwise it resumes forward
    /// from the last ingested date, or backfills backward from today when
    /// the store has nothing for this source yet.
    ///
    /// Returns the number of newly ingested weeks.
    #[instrument(level = "info", skip_all, fields(source = scraper.source(), cadence = scraper.source_type()))]
    pub async fn execute_scraper(
        &self,
        scraper: &dyn ChartScraper,
        start: Option<NaiveDate>,
    ) -> ScrapeResult<usize> {
        let source_type = self
            .store
            .source_type(scraper.source(), scraper.source_type())
            .await?
            .ok_or_else(|| {
                ScrapeError::Storage(format!(
                    "source type not seeded: {} {}",
                    scraper.source(),
                    scraper.source_type()
                ))
            })?;

        let last = self.store.last_week_date(source_type.id).await?;
        let (mut date, direction) = match (start, last) {
            (Some(explicit), _) => {
                let direction = ScanDirection::Forward;
                if self.store.week(explicit, source_type.id).await?.is_some() {
                    debug!(%explicit, "start date already ingested; scanning onward");
                    (
                        self.next_date(scraper, source_type.id, explicit, direction).await?,
                        direction,
                    )
                } else {
                    (Some(explicit), direction)
                }
            }
            (None, Some(last)) => {
                let direction = ScanDirection::Forward;
                (self.next_date(scraper, source_type.id, last, direction).await?, direction)
            }
            (None, None) => {
                let direction = ScanDirection::Backward;
                let today = Local::now().date_naive();
                (self.next_date(scraper, source_type.id, today, direction).await?, direction)
            }
        };

        let mut ingested = 0usize;
        while let Some(current) = date {
            match self.ingest_date(scraper, source_type.id, current).await {
                Ok(true) => {
                    ingested += 1;
                    info!(date = %current, "week ingested");
                }
                Ok(false) => {
                    info!(date = %current, "source has no content; stopping scan");
                    break;
                }
                Err(err) => {
                    error!(date = %current, error = %err, "ingestion failed; rolling back images");
                    if let Err(cleanup) = self
                        .images
                        .delete_for_date(scraper.source(), scraper.source_type(), current)
                        .await
                    {
                        warn!(date = %current, error = %cleanup, "image rollback failed");
                    }
                    return Err(err);
                }
            }
            date = self.next_date(scraper, source_type.id, current, direction).await?;
        }
        info!(weeks = ingested, "scrape run finished");
        Ok(ingested)
    }

    /// Scrape and persist one date. `Ok(false)` means the source had no
    /// published content, which ends the scan in this direction.
    async fn ingest_date(
        &self,
        scraper: &dyn ChartScraper,
        source_type_id: Uuid,
        date: NaiveDate,
    ) -> ScrapeResult<bool> {
        let Some(entries) = scraper.get_data(date).await? else {
            return Ok(false);
        };
        self.store
            .insert_week(NewWeek { source_type_id, date, entries })
            .await?;
        Ok(true)
    }

    /// Advance the scan past `from`, skipping dates whose Week already
    /// exists. Bounded: pathological scanners cannot loop forever.
    async fn next_date(
        &self,
        scraper: &dyn ChartScraper,
        source_type_id: Uuid,
        from: NaiveDate,
        direction: ScanDirection,
    ) -> ScrapeResult<Option<NaiveDate>> {
        let mut cursor = from;
        for _ in 0..self.max_date_steps {
            let Some(candidate) = scraper.find_latest_date(cursor, direction).await? else {
                return Ok(None);
            };
            if self.store.week(candidate, source_type_id).await?.is_none() {
                return Ok(Some(candidate));
            }
            debug!(date = %candidate, "date already ingested; continuing scan");
            cursor = candidate;
        }
        Ok(None)
    }
}
