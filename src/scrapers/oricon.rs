//! Oricon weekly comic ranking scraper.
//!
//! The chart for one date spans three pages of ten `section.box-rank-entry`
//! blocks each. Field extraction is pure and per-entry tolerant: a missing
//! rating or release date degrades to `None`, while a missing title block is
//! a structural error because every downstream resolution keys off it.
//!
//! Oricon publishes no historical index, so date discovery probes the
//! date-parameterized URL day by day: a 404 means "not published", any 2xx
//! means the chart exists.

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use futures::future;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{ScrapeError, ScrapeResult};
use crate::fetch::PageFetch;
use crate::images::ImageStore;
use crate::models::Content;
use crate::resolvers::cdjapan::{CoverImage, CoverSource};
use crate::resolvers::{AuxRecord, TitleQuery, TitleResolver};
use crate::scrapers::{ChartScraper, ScanDirection};
use crate::utils::image_extension;

const SOURCE: &str = "Oricon";
const SOURCE_TYPE: &str = "Weekly";
const BASE_URL: &str = "https://www.oricon.co.jp/rank/obc/w/";
const PAGE_COUNT: usize = 3;
const ENTRIES_PER_PAGE: usize = 10;
const PROBE_WINDOW_DAYS: u64 = 7;

static ENTRY: Lazy<Selector> = Lazy::new(|| Selector::parse("section.box-rank-entry").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("h2.title").unwrap());
static RATING: Lazy<Selector> = Lazy::new(|| Selector::parse("p.num").unwrap());
static DETAIL_ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("ul.list li").unwrap());
static INLINE_IMAGE: Lazy<Selector> = Lazy::new(|| Selector::parse("p.image img").unwrap());

/// Volume trails the name on Oricon ("ワンピース 103"); the head is the title.
static TRAILING_VOLUME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?P<title>.+?)\s\d+").unwrap());
static RELEASE_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?P<year>\d{4})年(?P<month>\d{2})月").unwrap());
static SALES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?P<sold>[0-9,]+)部").unwrap());

/// One rank entry's raw fields, before any resolution.
#[derive(Debug, Clone, PartialEq)]
struct RankEntry {
    rating: Option<u32>,
    title_line: String,
    volume: Option<u32>,
    release_date: Option<NaiveDate>,
    sales: Option<u64>,
    inline_image: Option<String>,
}

/// Scraper for the Oricon weekly comic chart.
pub struct OriconScraper {
    fetcher: Arc<dyn PageFetch>,
    resolver: Arc<dyn TitleResolver>,
    covers: Arc<dyn CoverSource>,
    images: Arc<dyn ImageStore>,
}

impl OriconScraper {
    pub fn new(
        fetcher: Arc<dyn PageFetch>,
        resolver: Arc<dyn TitleResolver>,
        covers: Arc<dyn CoverSource>,
        images: Arc<dyn ImageStore>,
    ) -> Self {
        Self { fetcher, resolver, covers, images }
    }

    /// Fetch and resolve one chart page. `page` is 1-based.
    #[instrument(level = "info", skip(self), fields(%date, page))]
    async fn page_contents(&self, date: NaiveDate, page: usize) -> ScrapeResult<Vec<Content>> {
        let url = format!("{BASE_URL}{}/p/{page}/", date.format("%Y-%m-%d"));
        let html = self.fetcher.fetch_text(&url).await?;
        let entries = page_entries(&html)?;

        let offset = (page - 1) * ENTRIES_PER_PAGE;
        let mut contents = Vec::with_capacity(entries.len());
        for (i, entry) in entries.into_iter().enumerate() {
            let position = (offset + i + 1) as u32;
            contents.push(self.build_content(entry, position, date).await);
        }
        Ok(contents)
    }

    async fn build_content(&self, entry: RankEntry, position: u32, date: NaiveDate) -> Content {
        let original = original_title(&entry.title_line);
        let query = TitleQuery {
            title: original.clone(),
            isbn: None,
            volume: entry.volume,
            release_date: entry.release_date,
        };
        let aux = match self.resolver.resolve(&query).await {
            Ok(aux) => aux,
            Err(err) => {
                warn!(title = %original, error = %err, "auxiliary resolution failed; keeping original title");
                AuxRecord {
                    name: original,
                    authors: Vec::new(),
                    publishers: Vec::new(),
                    volume: None,
                    image_url: None,
                }
            }
        };
        let image = self.save_cover(&entry, &aux, date).await;
        Content {
            name: aux.name,
            volume: entry.volume.or(aux.volume),
            image,
            authors: aux.authors,
            publishers: aux.publishers,
            release_date: entry.release_date,
            rating: entry.rating.unwrap_or(position),
            sold: entry.sales,
        }
    }

    /// Cover via the CDJapan search, falling back to the chart page's own
    /// thumbnail, then to whatever the auxiliary resolver saw. A failed
    /// cover never fails the entry.
    async fn save_cover(&self, entry: &RankEntry, aux: &AuxRecord, date: NaiveDate) -> Option<String> {
        let name = aux.name.as_str();
        let cover = match self
            .covers
            .fetch_cover(&entry.title_line, name, entry.volume)
            .await
        {
            Ok(cover) => cover,
            Err(ScrapeError::NotFound) => {
                let url = entry
                    .inline_image
                    .clone()
                    .or_else(|| aux.image_url.clone())?;
                match self.fetcher.fetch_bytes(&url).await {
                    Ok(bytes) => CoverImage { url, bytes },
                    Err(err) => {
                        warn!(%name, error = %err, "fallback cover fetch failed");
                        return None;
                    }
                }
            }
            Err(err) => {
                warn!(%name, error = %err, "cover search failed");
                return None;
            }
        };
        let filename = format!("{}.{}", Uuid::new_v4(), image_extension(&cover.url));
        match self
            .images
            .save(SOURCE, SOURCE_TYPE, &cover.bytes, &filename, date)
            .await
        {
            Ok(()) => Some(filename),
            Err(err) => {
                warn!(%name, error = %err, "cover save failed");
                None
            }
        }
    }
}

#[async_trait]
impl ChartScraper for OriconScraper {
    fn source(&self) -> &'static str {
        SOURCE
    }

    fn source_type(&self) -> &'static str {
        SOURCE_TYPE
    }

    #[instrument(level = "info", skip(self), fields(%date))]
    async fn get_data(&self, date: NaiveDate) -> ScrapeResult<Option<Vec<Content>>> {
        // Page 1 doubles as the existence check: a 404 there means no chart
        // was published for this date.
        let mut contents = match self.page_contents(date, 1).await {
            Ok(contents) => contents,
            Err(ScrapeError::NotFound) => return Ok(None),
            Err(err) => return Err(err),
        };
        // Later pages of a published chart must exist; a 404 here is a
        // partial chart and fails the date, leaving it uncommitted for a
        // retry. try_join_all keeps the pages in order.
        let rest = (2..=PAGE_COUNT).map(|page| self.page_contents(date, page));
        for page in future::try_join_all(rest).await? {
            contents.extend(page);
        }
        info!(entries = contents.len(), "scraped oricon chart");
        Ok(Some(contents))
    }

    #[instrument(level = "info", skip(self), fields(%date, ?direction))]
    async fn find_latest_date(
        &self,
        date: NaiveDate,
        direction: ScanDirection,
    ) -> ScrapeResult<Option<NaiveDate>> {
        for step in 1..=PROBE_WINDOW_DAYS {
            let guess = match direction {
                ScanDirection::Forward => date.checked_add_days(Days::new(step)),
                ScanDirection::Backward => date.checked_sub_days(Days::new(step)),
            };
            let Some(guess) = guess else {
                return Ok(None);
            };
            let url = format!("{BASE_URL}{}/", guess.format("%Y-%m-%d"));
            match self.fetcher.probe(&url).await {
                Ok(()) => return Ok(Some(guess)),
                Err(ScrapeError::NotFound | ScrapeError::Connect(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }
}

/// Extract every rank entry from one chart page.
///
/// An entry page without a single `section.box-rank-entry` is malformed and
/// fatal for the date, as is an entry without its title block.
fn page_entries(html: &str) -> ScrapeResult<Vec<RankEntry>> {
    let document = Html::parse_document(html);
    let mut entries = Vec::new();
    for section in document.select(&ENTRY) {
        let title_line = section
            .select(&TITLE)
            .next()
            .map(|el| {
                el.text()
                    .collect::<String>()
                    .trim()
                    .trim_end_matches('。')
                    .to_string()
            })
            .filter(|line| !line.is_empty())
            .ok_or_else(|| {
                ScrapeError::Structure("rank entry is missing its title block".to_string())
            })?;

        let rating = section
            .select(&RATING)
            .next()
            .and_then(|el| el.text().collect::<String>().trim().parse().ok());
        let inline_image = section
            .select(&INLINE_IMAGE)
            .next()
            .and_then(|img| img.value().attr("src"))
            .map(str::to_string);

        entries.push(RankEntry {
            rating,
            volume: extract_volume(&title_line),
            release_date: extract_release_date(&section),
            sales: extract_sales(&section),
            title_line,
            inline_image,
        });
    }
    if entries.is_empty() {
        return Err(ScrapeError::Structure(
            "no rank entries on chart page".to_string(),
        ));
    }
    Ok(entries)
}

/// Head of the title line, before the trailing volume number.
fn original_title(line: &str) -> String {
    TRAILING_VOLUME_RE
        .captures(line)
        .map(|caps| caps["title"].trim().to_string())
        .unwrap_or_else(|| line.trim().to_string())
}

/// First integer-parseable whitespace token; usually the volume.
fn extract_volume(line: &str) -> Option<u32> {
    line.split_whitespace().find_map(|token| token.parse().ok())
}

fn extract_release_date(section: &scraper::ElementRef<'_>) -> Option<NaiveDate> {
    let text = detail_row(section, "発売日")?;
    let caps = RELEASE_DATE_RE.captures(&text)?;
    NaiveDate::from_ymd_opt(
        caps["year"].parse().ok()?,
        caps["month"].parse().ok()?,
        1,
    )
}

fn extract_sales(section: &scraper::ElementRef<'_>) -> Option<u64> {
    let text = detail_row(section, "推定売上部数")?;
    let caps = SALES_RE.captures(&text)?;
    caps["sold"].replace(',', "").parse().ok()
}

fn detail_row(section: &scraper::ElementRef<'_>, label: &str) -> Option<String> {
    section
        .select(&DETAIL_ROW)
        .map(|li| li.text().collect::<String>())
        .find(|text| text.contains(label))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::NullImageStore;
    use std::collections::HashMap;

    const PAGE: &str = r#"
        <section class="box-rank-entry">
          <p class="num">1</p>
          <h2 class="title">ワンピース 103。</h2>
          <ul class="list">
            <li>発売日：2022年08月</li>
            <li>推定売上部数：125,146部</li>
          </ul>
          <p class="image"><img src="https://img.oricon.co.jp/one-piece.jpg"/></p>
        </section>
        <section class="box-rank-entry">
          <p class="num">総合</p>
          <h2 class="title">呪術廻戦 20</h2>
          <ul class="list">
            <li>発売日：2022年08月</li>
          </ul>
        </section>
    "#;

    #[test]
    fn test_page_entries_extracts_all_fields() {
        let entries = page_entries(PAGE).unwrap();
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.rating, Some(1));
        assert_eq!(first.title_line, "ワンピース 103");
        assert_eq!(first.volume, Some(103));
        assert_eq!(first.release_date, NaiveDate::from_ymd_opt(2022, 8, 1));
        assert_eq!(first.sales, Some(125_146));
        assert_eq!(
            first.inline_image.as_deref(),
            Some("https://img.oricon.co.jp/one-piece.jpg")
        );
    }

    #[test]
    fn test_non_numeric_rating_degrades_to_none() {
        let entries = page_entries(PAGE).unwrap();
        let second = &entries[1];
        assert_eq!(second.rating, None);
        assert_eq!(second.sales, None);
        assert_eq!(second.inline_image, None);
    }

    #[test]
    fn test_empty_page_is_a_structural_error() {
        let err = page_entries("<div>maintenance</div>").unwrap_err();
        assert!(matches!(err, ScrapeError::Structure(_)));
    }

    #[test]
    fn test_missing_title_block_is_a_structural_error() {
        let html = r#"<section class="box-rank-entry"><p class="num">1</p></section>"#;
        let err = page_entries(html).unwrap_err();
        assert!(matches!(err, ScrapeError::Structure(_)));
    }

    #[test]
    fn test_original_title_strips_trailing_volume() {
        assert_eq!(original_title("ワンピース 103"), "ワンピース");
        assert_eq!(original_title("SPY×FAMILY 10"), "SPY×FAMILY");
        assert_eq!(original_title("チェンソーマン"), "チェンソーマン");
    }

    #[test]
    fn test_volume_is_first_integer_token() {
        assert_eq!(extract_volume("ワンピース 103"), Some(103));
        assert_eq!(extract_volume("20thセンチュリーボーイズ 完全版 1"), Some(1));
        assert_eq!(extract_volume("チェンソーマン"), None);
    }

    struct CannedPages {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl PageFetch for CannedPages {
        async fn fetch_text(&self, url: &str) -> ScrapeResult<String> {
            self.pages.get(url).cloned().ok_or(ScrapeError::NotFound)
        }

        async fn fetch_bytes(&self, _url: &str) -> ScrapeResult<Vec<u8>> {
            Ok(vec![0xFF, 0xD8])
        }

        async fn probe(&self, url: &str) -> ScrapeResult<()> {
            self.fetch_text(url).await.map(|_| ())
        }
    }

    struct CannedResolver {
        fail: bool,
    }

    #[async_trait]
    impl TitleResolver for CannedResolver {
        async fn resolve(&self, query: &TitleQuery) -> ScrapeResult<AuxRecord> {
            if self.fail {
                return Err(ScrapeError::NotFound);
            }
            Ok(AuxRecord {
                name: format!("{} (resolved)", query.title),
                authors: vec!["尾田 栄一郎".to_string()],
                publishers: vec!["集英社".to_string()],
                volume: query.volume,
                image_url: None,
            })
        }
    }

    struct NoCovers;

    #[async_trait]
    impl CoverSource for NoCovers {
        async fn fetch_cover(
            &self,
            _search_name: &str,
            _filter_name: &str,
            _volume: Option<u32>,
        ) -> ScrapeResult<CoverImage> {
            Err(ScrapeError::NotFound)
        }
    }

    fn scraper(pages: HashMap<String, String>, resolver_fails: bool) -> OriconScraper {
        OriconScraper::new(
            Arc::new(CannedPages { pages }),
            Arc::new(CannedResolver { fail: resolver_fails }),
            Arc::new(NoCovers),
            Arc::new(NullImageStore),
        )
    }

    fn chart_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 8, 9).unwrap()
    }

    fn page_url(page: usize) -> String {
        format!("{BASE_URL}2022-08-09/p/{page}/")
    }

    fn single_entry_page(rank: u32, title: &str) -> String {
        format!(
            r#"<section class="box-rank-entry"><p class="num">{rank}</p><h2 class="title">{title}</h2></section>"#
        )
    }

    fn full_chart() -> HashMap<String, String> {
        HashMap::from([
            (page_url(1), PAGE.to_string()),
            (page_url(2), single_entry_page(11, "ブルーロック 21")),
            (page_url(3), single_entry_page(21, "ブルーロック 20")),
        ])
    }

    #[tokio::test]
    async fn test_get_data_assembles_pages_in_order() {
        let scraper = scraper(full_chart(), false);
        let contents = scraper.get_data(chart_date()).await.unwrap().unwrap();
        assert_eq!(contents.len(), 4);
        assert_eq!(contents[0].name, "ワンピース (resolved)");
        assert_eq!(contents[0].rating, 1);
        assert_eq!(contents[3].rating, 21);
        // Entry 1 has an inline thumbnail to fall back on; entry 2 has none.
        assert!(contents[0].image.is_some());
        assert!(contents[1].image.is_none());
    }

    #[tokio::test]
    async fn test_rating_falls_back_to_chart_position() {
        // The second entry on page 1 carries the non-numeric "総合" rating.
        let scraper = scraper(full_chart(), false);
        let contents = scraper.get_data(chart_date()).await.unwrap().unwrap();
        assert_eq!(contents[1].rating, 2);
    }

    #[tokio::test]
    async fn test_resolver_failure_keeps_the_original_title() {
        let scraper = scraper(full_chart(), true);
        let contents = scraper.get_data(chart_date()).await.unwrap().unwrap();
        assert_eq!(contents[0].name, "ワンピース");
        assert!(contents[0].authors.is_empty());
        assert!(contents[0].publishers.is_empty());
    }

    #[tokio::test]
    async fn test_unpublished_date_has_no_chart() {
        let scraper = scraper(HashMap::new(), false);
        assert!(scraper.get_data(chart_date()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_later_page_fails_the_date() {
        let mut pages = full_chart();
        pages.remove(&page_url(3));
        let scraper = scraper(pages, false);
        let err = scraper.get_data(chart_date()).await.unwrap_err();
        assert!(matches!(err, ScrapeError::NotFound));
    }
}
