//! Cover-image sink.
//!
//! Scrapers hand downloaded cover bytes to an [`ImageStore`] keyed by
//! `(source, source type, chart date)`; the orchestrator calls
//! [`ImageStore::delete_for_date`] when a date's ingestion fails so no files
//! outlive a rolled-back Week.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ScrapeResult;

/// Where saved covers land for one chart date.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Persist one cover under the date's key.
    async fn save(
        &self,
        source: &str,
        source_type: &str,
        bytes: &[u8],
        filename: &str,
        date: NaiveDate,
    ) -> ScrapeResult<()>;

    /// Remove everything saved for the date. Used on ingestion rollback;
    /// a date that was never written is not an error.
    async fn delete_for_date(
        &self,
        source: &str,
        source_type: &str,
        date: NaiveDate,
    ) -> ScrapeResult<()>;
}

/// Filesystem sink writing `{root}/{source}/{type}/{date}/{filename}`,
/// with source and type lower-cased.
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn date_dir(&self, source: &str, source_type: &str, date: NaiveDate) -> PathBuf {
        self.root
            .join(source.to_lowercase())
            .join(source_type.to_lowercase())
            .join(date.format("%Y-%m-%d").to_string())
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn save(
        &self,
        source: &str,
        source_type: &str,
        bytes: &[u8],
        filename: &str,
        date: NaiveDate,
    ) -> ScrapeResult<()> {
        let dir = self.date_dir(source, source_type, date);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(filename);
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "saved cover");
        Ok(())
    }

    async fn delete_for_date(
        &self,
        source: &str,
        source_type: &str,
        date: NaiveDate,
    ) -> ScrapeResult<()> {
        let dir = self.date_dir(source, source_type, date);
        if Path::new(&dir).exists() {
            tokio::fs::remove_dir_all(&dir).await?;
            debug!(path = %dir.display(), "deleted covers for rolled-back date");
        }
        Ok(())
    }
}

/// Discards every image. Used by tests and `--image-dir` dry runs.
pub struct NullImageStore;

#[async_trait]
impl ImageStore for NullImageStore {
    async fn save(
        &self,
        _source: &str,
        _source_type: &str,
        _bytes: &[u8],
        _filename: &str,
        _date: NaiveDate,
    ) -> ScrapeResult<()> {
        Ok(())
    }

    async fn delete_for_date(
        &self,
        _source: &str,
        _source_type: &str,
        _date: NaiveDate,
    ) -> ScrapeResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 8, 9).unwrap()
    }

    #[tokio::test]
    async fn test_save_and_rollback_round_trip() {
        let root = std::env::temp_dir().join(format!("covers-{}", uuid::Uuid::new_v4()));
        let store = FsImageStore::new(&root);

        store
            .save("Oricon", "Weekly", b"jpeg bytes", "cover.jpg", date())
            .await
            .unwrap();
        let expected = root.join("oricon/weekly/2022-08-09/cover.jpg");
        assert!(expected.exists());

        store.delete_for_date("Oricon", "Weekly", date()).await.unwrap();
        assert!(!expected.parent().unwrap().exists());

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_of_unwritten_date_is_a_no_op() {
        let root = std::env::temp_dir().join(format!("covers-{}", uuid::Uuid::new_v4()));
        let store = FsImageStore::new(&root);
        store.delete_for_date("Oricon", "Weekly", date()).await.unwrap();
    }
}
