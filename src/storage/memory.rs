//! In-memory [`ChartStore`] used by tests and standalone runs.
//!
//! A single tokio mutex guards all tables, which makes every operation
//! trivially atomic: `insert_week` validates first and mutates only after
//! nothing can fail, so a rejected date leaves no partial rows behind.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{ScrapeError, ScrapeResult};
use crate::models::{
    ItemRecord, MonthGroup, NewWeek, PreviousRank, Source, SourceType, Week, YearGroup,
};
use crate::storage::ChartStore;

/// One row of a name-deduplicated entity table.
#[derive(Debug, Clone)]
struct NamedRow {
    id: Uuid,
    name: String,
}

#[derive(Debug, Clone)]
struct StoredItem {
    id: Uuid,
    week_id: Uuid,
    title_id: Uuid,
    volume: Option<u32>,
    image: Option<String>,
    author_ids: Vec<Uuid>,
    publisher_ids: Vec<Uuid>,
    release_date: Option<NaiveDate>,
    rating: u32,
    sold: Option<u64>,
    previous_rank: Option<PreviousRank>,
}

#[derive(Debug, Default)]
struct Inner {
    sources: Vec<Source>,
    source_types: Vec<SourceType>,
    weeks: Vec<Week>,
    items: Vec<StoredItem>,
    titles: Vec<NamedRow>,
    authors: Vec<NamedRow>,
    publishers: Vec<NamedRow>,
}

/// In-memory chart store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Empty store with no sources. Mostly useful to exercise the
    /// missing-seed error path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with the production sources and their weekly
    /// cadence, matching the deployment seed.
    pub fn seeded() -> Self {
        let mut inner = Inner::default();
        for name in ["Oricon", "Shoseki"] {
            let source = Source { id: Uuid::new_v4(), name: name.to_string() };
            inner.source_types.push(SourceType {
                id: Uuid::new_v4(),
                source_id: source.id,
                name: "Weekly".to_string(),
            });
            inner.sources.push(source);
        }
        Self { inner: Mutex::new(inner) }
    }
}

impl Inner {
    fn previous_week_of(&self, date: NaiveDate, source_type_id: Uuid) -> Option<Week> {
        self.weeks
            .iter()
            .filter(|w| w.source_type_id == source_type_id && w.date < date)
            .max_by_key(|w| w.date)
            .copied()
    }

    /// Rank movement of `title_name` between the given week and a current
    /// rank: a numerically smaller current rank is an improvement.
    fn rank_delta(
        &self,
        previous_week_id: Uuid,
        current_rank: u32,
        title_name: &str,
    ) -> Option<PreviousRank> {
        let title_id = self
            .titles
            .iter()
            .find(|row| row.name == title_name)
            .map(|row| row.id)?;
        let previous = self
            .items
            .iter()
            .find(|item| item.week_id == previous_week_id && item.title_id == title_id)?;
        Some(match previous.rating.cmp(&current_rank) {
            std::cmp::Ordering::Greater => PreviousRank::Up,
            std::cmp::Ordering::Equal => PreviousRank::Same,
            std::cmp::Ordering::Less => PreviousRank::Down,
        })
    }

    fn name_of(rows: &[NamedRow], id: Uuid) -> String {
        rows.iter()
            .find(|row| row.id == id)
            .map(|row| row.name.clone())
            .unwrap_or_default()
    }

    fn get_or_create(rows: &mut Vec<NamedRow>, name: &str) -> Uuid {
        if let Some(row) = rows.iter().find(|row| row.name == name) {
            return row.id;
        }
        let id = Uuid::new_v4();
        rows.push(NamedRow { id, name: name.to_string() });
        id
    }
}

#[async_trait]
impl ChartStore for MemoryStore {
    async fn sources(&self) -> ScrapeResult<Vec<Source>> {
        Ok(self.inner.lock().await.sources.clone())
    }

    async fn source_type(
        &self,
        source_name: &str,
        type_name: &str,
    ) -> ScrapeResult<Option<SourceType>> {
        let inner = self.inner.lock().await;
        let Some(source) = inner.sources.iter().find(|s| s.name == source_name) else {
            return Ok(None);
        };
        Ok(inner
            .source_types
            .iter()
            .find(|st| st.source_id == source.id && st.name == type_name)
            .cloned())
    }

    async fn week(&self, date: NaiveDate, source_type_id: Uuid) -> ScrapeResult<Option<Week>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .weeks
            .iter()
            .find(|w| w.date == date && w.source_type_id == source_type_id)
            .copied())
    }

    async fn last_week_date(&self, source_type_id: Uuid) -> ScrapeResult<Option<NaiveDate>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .weeks
            .iter()
            .filter(|w| w.source_type_id == source_type_id)
            .map(|w| w.date)
            .max())
    }

    async fn previous_week(
        &self,
        date: NaiveDate,
        source_type_id: Uuid,
    ) -> ScrapeResult<Option<Week>> {
        let inner = self.inner.lock().await;
        Ok(inner.previous_week_of(date, source_type_id))
    }

    async fn weeks_grouped(
        &self,
        source_name: &str,
        type_name: &str,
    ) -> ScrapeResult<Vec<YearGroup>> {
        let Some(source_type) = self.source_type(source_name, type_name).await? else {
            return Ok(Vec::new());
        };
        let inner = self.inner.lock().await;
        let mut dates: Vec<NaiveDate> = inner
            .weeks
            .iter()
            .filter(|w| w.source_type_id == source_type.id)
            .map(|w| w.date)
            .collect();
        dates.sort();

        let mut years: Vec<YearGroup> = Vec::new();
        for date in dates {
            if years.last().is_none_or(|group| group.year != date.year()) {
                years.push(YearGroup { year: date.year(), months: Vec::new() });
            }
            let Some(year) = years.last_mut() else {
                continue;
            };
            let month_name = date.format("%B").to_string();
            if year.months.last().is_none_or(|group| group.name != month_name) {
                year.months.push(MonthGroup { name: month_name, days: Vec::new() });
            }
            if let Some(month) = year.months.last_mut() {
                month.days.push(date.day());
            }
        }
        Ok(years)
    }

    async fn previous_rank(
        &self,
        previous_week_id: Uuid,
        current_rank: u32,
        title_name: &str,
    ) -> ScrapeResult<Option<PreviousRank>> {
        let inner = self.inner.lock().await;
        Ok(inner.rank_delta(previous_week_id, current_rank, title_name))
    }

    async fn items(&self, date: NaiveDate, source_type_id: Uuid) -> ScrapeResult<Vec<ItemRecord>> {
        let inner = self.inner.lock().await;
        let Some(week) = inner
            .weeks
            .iter()
            .find(|w| w.date == date && w.source_type_id == source_type_id)
        else {
            return Ok(Vec::new());
        };
        let mut records: Vec<ItemRecord> = inner
            .items
            .iter()
            .filter(|item| item.week_id == week.id)
            .map(|item| ItemRecord {
                id: item.id,
                week_id: item.week_id,
                title: Inner::name_of(&inner.titles, item.title_id),
                volume: item.volume,
                image: item.image.clone(),
                authors: item
                    .author_ids
                    .iter()
                    .map(|id| Inner::name_of(&inner.authors, *id))
                    .collect(),
                publishers: item
                    .publisher_ids
                    .iter()
                    .map(|id| Inner::name_of(&inner.publishers, *id))
                    .collect(),
                release_date: item.release_date,
                rating: item.rating,
                sold: item.sold,
                previous_rank: item.previous_rank,
            })
            .collect();
        records.sort_by_key(|record| record.rating);
        Ok(records)
    }

    async fn insert_week(&self, week: NewWeek) -> ScrapeResult<Uuid> {
        let mut inner = self.inner.lock().await;
        if !inner
            .source_types
            .iter()
            .any(|st| st.id == week.source_type_id)
        {
            return Err(ScrapeError::Storage(format!(
                "unknown source type {}",
                week.source_type_id
            )));
        }
        if inner
            .weeks
            .iter()
            .any(|w| w.date == week.date && w.source_type_id == week.source_type_id)
        {
            return Err(ScrapeError::Storage(format!(
                "week {} already ingested for this source type",
                week.date
            )));
        }

        let previous_week = inner.previous_week_of(week.date, week.source_type_id);
        let week_id = Uuid::new_v4();
        // Nothing below can fail: the whole date lands or none of it does.
        for entry in &week.entries {
            let previous_rank = previous_week
                .and_then(|prev| inner.rank_delta(prev.id, entry.rating, &entry.name));
            let title_id = Inner::get_or_create(&mut inner.titles, &entry.name);
            let author_ids = entry
                .authors
                .iter()
                .map(|name| Inner::get_or_create(&mut inner.authors, name))
                .collect();
            let publisher_ids = entry
                .publishers
                .iter()
                .map(|name| Inner::get_or_create(&mut inner.publishers, name))
                .collect();
            inner.items.push(StoredItem {
                id: Uuid::new_v4(),
                week_id,
                title_id,
                volume: entry.volume,
                image: entry.image.clone(),
                author_ids,
                publisher_ids,
                release_date: entry.release_date,
                rating: entry.rating,
                sold: entry.sold,
                previous_rank,
            });
        }
        inner.weeks.push(Week {
            id: week_id,
            source_type_id: week.source_type_id,
            date: week.date,
        });
        Ok(week_id)
    }
}
