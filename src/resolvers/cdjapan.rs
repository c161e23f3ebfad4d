//! CDJapan cover-image search.
//!
//! Answers one narrow question: given a chart title line and the resolved
//! display name, find the matching BOOK listing and download its cover.
//! The search runs on the raw chart line (the store indexes Japanese
//! titles); ranking runs against the resolved name the caller will persist.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{ScrapeError, ScrapeResult};
use crate::fetch::Fetcher;
use crate::matching::{closest_candidate, CandidateEntry};

const SEARCH_URL: &str = "https://www.cdjapan.co.jp/searchuni?term.media_format=BOOK&q=";
const MAX_ATTEMPTS: usize = 5;
const RETRY_PAUSE: Duration = Duration::from_secs(10);

/// Listing titles end in the volume number when the edition has one.
static TITLED_VOLUME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?P<title>.+)\s(?P<volume>\d+)").unwrap());
/// Without an expected volume, take the undecorated head of the title.
static BARE_TITLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?P<title>[^\[\(]+)\s").unwrap());

static RESULT_ITEM: Lazy<Selector> =
    Lazy::new(|| Selector::parse("ul#js-search-result li.item").unwrap());
static ITEM_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("span.title-text").unwrap());
static ITEM_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static PRODUCT_IMAGE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div#recs-sp-msg-container img").unwrap());

/// A downloaded cover and the URL it came from (the extension source).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    pub url: String,
    pub bytes: Vec<u8>,
}

/// A source of cover images for a titled chart entry.
///
/// `fetch_cover` answers with [`ScrapeError::NotFound`] when no candidate
/// survives filtering; callers fall back to whatever image they have.
#[async_trait]
pub trait CoverSource: Send + Sync {
    async fn fetch_cover(
        &self,
        search_name: &str,
        filter_name: &str,
        volume: Option<u32>,
    ) -> ScrapeResult<CoverImage>;
}

/// Cover-image client backed by cdjapan.co.jp.
pub struct CdJapanCovers {
    fetcher: Arc<Fetcher>,
}

impl CdJapanCovers {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Search for `search_name` (+ volume), rank candidates against
    /// `filter_name`, and download the best match's cover.
    ///
    /// Transport errors pause and retry; candidate misses are
    /// [`ScrapeError::NotFound`] and the caller picks its fallback.
    #[instrument(level = "debug", skip_all, fields(%filter_name, ?volume))]
    pub async fn fetch_cover(
        &self,
        search_name: &str,
        filter_name: &str,
        volume: Option<u32>,
    ) -> ScrapeResult<CoverImage> {
        let mut attempt = 1;
        loop {
            match self.try_fetch_cover(search_name, filter_name, volume).await {
                Err(ScrapeError::Connect(detail)) if attempt < MAX_ATTEMPTS => {
                    warn!(attempt, %detail, "cover search connection failed; pausing");
                    tokio::time::sleep(RETRY_PAUSE).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn try_fetch_cover(
        &self,
        search_name: &str,
        filter_name: &str,
        volume: Option<u32>,
    ) -> ScrapeResult<CoverImage> {
        let query = match volume {
            Some(volume) => format!("{search_name} {volume}"),
            None => search_name.to_string(),
        };
        let search_url = format!("{SEARCH_URL}{}", urlencoding::encode(&query));
        let listing = self.fetcher.fetch_text(&search_url).await?;

        let candidates = search_candidates(&listing, volume);
        let best = closest_candidate(filter_name, &candidates).ok_or(ScrapeError::NotFound)?;
        debug!(candidate = %best.title, "picked cover candidate");

        let product = self.fetcher.fetch_text(&best.link).await?;
        let image_url = product_image_url(&product).ok_or(ScrapeError::NotFound)?;
        let bytes = self.fetcher.fetch_bytes(&image_url).await?;
        Ok(CoverImage { url: image_url, bytes })
    }
}

#[async_trait]
impl CoverSource for CdJapanCovers {
    async fn fetch_cover(
        &self,
        search_name: &str,
        filter_name: &str,
        volume: Option<u32>,
    ) -> ScrapeResult<CoverImage> {
        CdJapanCovers::fetch_cover(self, search_name, filter_name, volume).await
    }
}

/// Candidates from the search listing, filtered by volume equality when the
/// caller expects a specific volume.
fn search_candidates(html: &str, volume: Option<u32>) -> Vec<CandidateEntry> {
    let document = Html::parse_document(html);
    let mut candidates = Vec::new();
    for (index, item) in document.select(&RESULT_ITEM).enumerate() {
        let Some(full_name) = item
            .select(&ITEM_TITLE)
            .next()
            .map(|el| el.text().collect::<String>())
        else {
            continue;
        };
        let Some(link) = item
            .select(&ITEM_LINK)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };
        let pattern = if volume.is_some() { &TITLED_VOLUME_RE } else { &BARE_TITLE_RE };
        let Some(caps) = pattern.captures(full_name.trim()) else {
            continue;
        };
        let candidate_volume = caps.name("volume").and_then(|m| m.as_str().parse().ok());
        if let (Some(want), Some(have)) = (volume, candidate_volume) {
            if want != have {
                continue;
            }
        }
        candidates.push(CandidateEntry {
            index,
            title: caps["title"].trim().to_string(),
            volume: candidate_volume,
            link: link.to_string(),
            publication_date: None,
        });
    }
    candidates
}

/// Cover URL from a product page; scheme-relative CDN URLs get `https:`.
fn product_image_url(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let src = document
        .select(&PRODUCT_IMAGE)
        .next()
        .and_then(|img| img.value().attr("src"))?;
    if let Some(rest) = src.strip_prefix("//") {
        Some(format!("https://{rest}"))
    } else {
        Some(src.to_string())
    }
}
