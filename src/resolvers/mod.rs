//! Auxiliary metadata resolvers.
//!
//! Chart entries carry little more than a source-language title line; these
//! clients recover the rest from community and retail databases:
//!
//! | Resolver | Site | Provides |
//! |----------|------|----------|
//! | [`MangaUpdatesResolver`] | mangaupdates.com | canonical title, authors, original publisher, cover URL |
//! | [`AmazonResolver`] | amazon.co.jp | volume recovery by ISBN, publication-date checks, cover URL |
//! | [`CdJapanCovers`] | cdjapan.co.jp | cover image bytes for a title and volume |
//!
//! The first two implement [`TitleResolver`]. CDJapan answers a narrower
//! question (image bytes, not metadata) and keeps its own interface.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::ScrapeResult;

pub mod amazon;
pub mod cdjapan;
pub mod manga_updates;

pub use amazon::AmazonResolver;
pub use cdjapan::{CdJapanCovers, CoverImage, CoverSource};
pub use manga_updates::MangaUpdatesResolver;

/// What a chart scraper knows about a title before resolution.
#[derive(Debug, Clone, Default)]
pub struct TitleQuery {
    /// Original source-language title, the search key.
    pub title: String,
    /// 13-digit ISBN when the chart lists one (the blog source does).
    pub isbn: Option<String>,
    /// Volume parsed from the chart, used to reject wrong-volume candidates.
    pub volume: Option<u32>,
    /// Release date parsed from the chart, used for the ±2-month window.
    pub release_date: Option<NaiveDate>,
}

/// Everything a resolver could recover for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct AuxRecord {
    /// Resolved display title; falls back to the query title.
    pub name: String,
    pub authors: Vec<String>,
    pub publishers: Vec<String>,
    /// Volume recovered from the result listing, when the query had none.
    pub volume: Option<u32>,
    /// Cover image URL on the resolver's own site.
    pub image_url: Option<String>,
}

/// A metadata source that can answer a [`TitleQuery`].
///
/// `resolve` returns `ScrapeError::NotFound` when no candidate survives
/// filtering; chart scrapers treat that as a soft failure and keep the
/// original title with empty author/publisher lists.
#[async_trait]
pub trait TitleResolver: Send + Sync {
    async fn resolve(&self, query: &TitleQuery) -> ScrapeResult<AuxRecord>;
}
