//! Shoseki weekly ranking scraper (blog-hosted source).
//!
//! The chart lives in FC2 blog posts: a category page lists recent post
//! dates in descending order, and each post's body is a flat run of text
//! lines, three per entry — rank, 13-digit ISBN, then a combined line with
//! the title, volume, publisher and release date. The lines arrive with
//! full-width digits and padding, so everything is NFKC-folded first.
//!
//! Shoseki never reports sales numbers, and its lines frequently omit the
//! volume; the Amazon resolver recovers it by ISBN when that happens. Covers
//! come from the Amazon book search for the same ISBN.

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{ScrapeError, ScrapeResult};
use crate::fetch::PageFetch;
use crate::images::ImageStore;
use crate::models::Content;
use crate::resolvers::{AuxRecord, TitleQuery, TitleResolver};
use crate::scrapers::{ChartScraper, ScanDirection};
use crate::utils::{image_extension, normalize_text, parse_flexible_date, parse_volume_token};

const SOURCE: &str = "Shoseki";
const SOURCE_TYPE: &str = "Weekly";
const INDEX_URL: &str = "http://shosekiranking.blog.fc2.com/blog-category-6.html";
const SEARCH_URL: &str = "https://www.amazon.co.jp/s?i=stripbooks&ref=nb_sb_noss&k=";
const MAX_ENTRIES: usize = 30;

static INDEX_ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("ul.list_body li").unwrap());
static ROW_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static POST_BODY: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.content div.entry_body").unwrap());
static SEARCH_IMAGE: Lazy<Selector> = Lazy::new(|| Selector::parse("img.s-image").unwrap());

/// Title head: a solid token run (or any non-digit run) before the volume.
static TITLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?P<title>\S+|\D+)\s\d+").unwrap());
/// Volume between the title and the publisher tail; Roman numerals happen.
static VOLUME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\S+\s(?P<volume>\d+|[MDCLXVI]+)\s\D+").unwrap());
/// Release date closes the line: `… 集英社 2022.8.4`.
static RELEASE_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?P<year>\d+)\.(?P<month>\d+)\.(?P<day>\d+)$").unwrap());

/// Scraper for the Shoseki weekly chart blog.
pub struct ShosekiScraper {
    fetcher: Arc<dyn PageFetch>,
    resolver: Arc<dyn TitleResolver>,
    amazon: Arc<dyn TitleResolver>,
    images: Arc<dyn ImageStore>,
}

impl ShosekiScraper {
    pub fn new(
        fetcher: Arc<dyn PageFetch>,
        resolver: Arc<dyn TitleResolver>,
        amazon: Arc<dyn TitleResolver>,
        images: Arc<dyn ImageStore>,
    ) -> Self {
        Self { fetcher, resolver, amazon, images }
    }

    async fn build_content(
        &self,
        row: (String, String, String),
        position: u32,
        date: NaiveDate,
    ) -> ScrapeResult<Content> {
        let (rank, isbn, line) = row;
        let original = original_title(&line)?;
        let release_date = extract_release_date(&line);
        let mut volume = extract_volume(&line);

        let query = TitleQuery {
            title: original.clone(),
            isbn: Some(isbn.clone()),
            volume,
            release_date,
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
        if volume.is_none() {
            match self.amazon.resolve(&query).await {
                Ok(record) => volume = record.volume,
                Err(err) => debug!(%isbn, error = %err, "volume recovery by isbn failed"),
            }
        }

        let image = self.save_cover(&isbn, date).await;
        Ok(Content {
            name: aux.name,
            volume: volume.or(aux.volume),
            image,
            authors: aux.authors,
            publishers: aux.publishers,
            release_date,
            rating: rank.parse().unwrap_or(position),
            // Shoseki never reports sales figures.
            sold: None,
        })
    }

    /// First cover thumbnail from the storefront's ISBN search. Optional.
    async fn save_cover(&self, isbn: &str, date: NaiveDate) -> Option<String> {
        let url = format!("{SEARCH_URL}{}", urlencoding::encode(isbn));
        let listing = match self.fetcher.fetch_text(&url).await {
            Ok(listing) => listing,
            Err(err) => {
                warn!(%isbn, error = %err, "cover search failed");
                return None;
            }
        };
        let image_url = first_search_image(&listing)?;
        let bytes = match self.fetcher.fetch_bytes(&image_url).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%isbn, error = %err, "cover fetch failed");
                return None;
            }
        };
        let filename = format!("{}.{}", Uuid::new_v4(), image_extension(&image_url));
        match self
            .images
            .save(SOURCE, SOURCE_TYPE, &bytes, &filename, date)
            .await
        {
            Ok(()) => Some(filename),
            Err(err) => {
                warn!(%isbn, error = %err, "cover save failed");
                None
            }
        }
    }
}

#[async_trait]
impl ChartScraper for ShosekiScraper {
    fn source(&self) -> &'static str {
        SOURCE
    }

    fn source_type(&self) -> &'static str {
        SOURCE_TYPE
    }

    #[instrument(level = "info", skip(self), fields(%date))]
    async fn get_data(&self, date: NaiveDate) -> ScrapeResult<Option<Vec<Content>>> {
        let index = self.fetcher.fetch_text(INDEX_URL).await?;
        let Some(post_url) = post_link_for(&index, date) else {
            return Ok(None);
        };
        let post = self.fetcher.fetch_text(&post_url).await?;
        let rows = post_rows(&post)?;

        let mut contents = Vec::with_capacity(rows.len());
        for (i, row) in rows.into_iter().enumerate() {
            contents.push(self.build_content(row, (i + 1) as u32, date).await?);
        }
        info!(entries = contents.len(), "scraped shoseki chart");
        Ok(Some(contents))
    }

    #[instrument(level = "info", skip(self), fields(%date, ?direction))]
    async fn find_latest_date(
        &self,
        date: NaiveDate,
        direction: ScanDirection,
    ) -> ScrapeResult<Option<NaiveDate>> {
        let index = self.fetcher.fetch_text(INDEX_URL).await?;
        let rows = index_rows(&index)?;
        Ok(scan_index(&rows, date, direction))
    }
}

/// Walk the descending date index for the first date past `date` in the
/// requested direction, excluding `date` itself.
fn scan_index(
    rows: &[(NaiveDate, String)],
    date: NaiveDate,
    direction: ScanDirection,
) -> Option<NaiveDate> {
    match direction {
        ScanDirection::Backward => {
            let target = date.checked_sub_days(Days::new(1))?;
            rows.iter().map(|(d, _)| *d).find(|d| *d <= target)
        }
        ScanDirection::Forward => {
            let target = date.checked_add_days(Days::new(1))?;
            // Oldest qualifying entry: the list is newest-first.
            rows.iter().rev().map(|(d, _)| *d).find(|d| *d >= target)
        }
    }
}

/// Published dates and post links from the category index, newest first.
fn index_rows(html: &str) -> ScrapeResult<Vec<(NaiveDate, String)>> {
    let document = Html::parse_document(html);
    let mut rows = Vec::new();
    for li in document.select(&INDEX_ROW) {
        let text = normalize_text(&li.text().collect::<String>());
        let Ok(date) = parse_flexible_date(&text) else {
            continue;
        };
        let Some(href) = li
            .select(&ROW_LINK)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };
        rows.push((date, href.to_string()));
    }
    if rows.is_empty() {
        return Err(ScrapeError::Structure(
            "category index has no dated rows".to_string(),
        ));
    }
    Ok(rows)
}

/// Link to the post holding the chart for exactly `date`, if published.
fn post_link_for(html: &str, date: NaiveDate) -> Option<String> {
    index_rows(html)
        .ok()?
        .into_iter()
        .find(|(d, _)| *d == date)
        .map(|(_, href)| href)
}

/// The post body as `(rank, isbn, title line)` rows, NFKC-folded,
/// capped at the chart's 30 entries.
fn post_rows(html: &str) -> ScrapeResult<Vec<(String, String, String)>> {
    let document = Html::parse_document(html);
    let body = document.select(&POST_BODY).next().ok_or_else(|| {
        ScrapeError::Structure("blog post is missing its entry body".to_string())
    })?;
    let rows = body
        .text()
        .flat_map(|chunk| chunk.lines())
        .map(normalize_text)
        .filter(|line| !line.is_empty())
        .tuples()
        .take(MAX_ENTRIES)
        .collect();
    Ok(rows)
}

/// Title head of the combined line. Load-bearing: a line this regex cannot
/// split is a malformed post, and the whole date aborts.
fn original_title(line: &str) -> ScrapeResult<String> {
    TITLE_RE
        .captures(line)
        .map(|caps| caps["title"].trim().to_string())
        .ok_or_else(|| ScrapeError::Structure(format!("unparsable title line: {line}")))
}

fn extract_volume(line: &str) -> Option<u32> {
    let caps = VOLUME_RE.captures(line)?;
    parse_volume_token(&caps["volume"])
}

fn extract_release_date(line: &str) -> Option<NaiveDate> {
    let caps = RELEASE_DATE_RE.captures(line)?;
    NaiveDate::from_ymd_opt(
        caps["year"].parse().ok()?,
        caps["month"].parse().ok()?,
        caps["day"].parse().ok()?,
    )
}

/// First thumbnail on the storefront search page.
fn first_search_image(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&SEARCH_IMAGE)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::NullImageStore;
    use std::collections::HashMap;

    const INDEX: &str = r#"
        <ul class="list_body">
          <li><a href="http://shosekiranking.blog.fc2.com/blog-entry-300.html">2022/10/11 : コミック週間売上ランキング</a></li>
          <li><a href="http://shosekiranking.blog.fc2.com/blog-entry-299.html">2022/10/04 : コミック週間売上ランキング</a></li>
          <li><a href="http://shosekiranking.blog.fc2.com/blog-entry-298.html">2022/09/27 : コミック週間売上ランキング</a></li>
        </ul>
    "#;

    const POST: &str = r#"
        <div class="content"><div class="entry_body">
          １<br>9784088831060<br>ワンピース 103 集英社 2022.8.4<br>
          ２<br>9784088832715<br>チェンソーマン 11 集英社 2022.3.4<br>
        </div></div>
    "#;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_index_rows_parse_descending_dates() {
        let rows = index_rows(INDEX).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].0, date(2022, 10, 11));
        assert_eq!(
            rows[1].1,
            "http://shosekiranking.blog.fc2.com/blog-entry-299.html"
        );
    }

    #[test]
    fn test_post_link_only_for_exact_date() {
        assert!(post_link_for(INDEX, date(2022, 10, 4)).is_some());
        assert!(post_link_for(INDEX, date(2022, 10, 5)).is_none());
    }

    #[test]
    fn test_index_without_rows_is_structural() {
        let err = index_rows("<ul class=\"list_body\"></ul>").unwrap_err();
        assert!(matches!(err, ScrapeError::Structure(_)));
    }

    #[test]
    fn test_scan_index_backward_skips_the_start_date() {
        let rows = index_rows(INDEX).unwrap();
        assert_eq!(
            scan_index(&rows, date(2022, 10, 11), ScanDirection::Backward),
            Some(date(2022, 10, 4))
        );
        assert_eq!(
            scan_index(&rows, date(2022, 9, 27), ScanDirection::Backward),
            None
        );
    }

    #[test]
    fn test_scan_index_forward_takes_the_oldest_newer_date() {
        let rows = index_rows(INDEX).unwrap();
        assert_eq!(
            scan_index(&rows, date(2022, 9, 27), ScanDirection::Forward),
            Some(date(2022, 10, 4))
        );
        assert_eq!(
            scan_index(&rows, date(2022, 10, 11), ScanDirection::Forward),
            None
        );
    }

    #[test]
    fn test_post_rows_fold_full_width_digits() {
        let rows = post_rows(POST).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "1");
        assert_eq!(rows[0].1, "9784088831060");
        assert_eq!(rows[0].2, "ワンピース 103 集英社 2022.8.4");
    }

    #[test]
    fn test_missing_entry_body_is_structural() {
        let err = post_rows("<div class=\"content\"></div>").unwrap_err();
        assert!(matches!(err, ScrapeError::Structure(_)));
    }

    #[test]
    fn test_title_volume_and_date_extraction() {
        let line = "ワンピース 103 集英社 2022.8.4";
        assert_eq!(original_title(line).unwrap(), "ワンピース");
        assert_eq!(extract_volume(line), Some(103));
        assert_eq!(extract_release_date(line), Some(date(2022, 8, 4)));
    }

    #[test]
    fn test_roman_volume_falls_back_to_conversion() {
        let line = "ベルセルク XIV 白泉社 2022.8.4";
        assert_eq!(extract_volume(line), Some(14));
    }

    #[test]
    fn test_unparsable_title_line_is_structural() {
        assert!(original_title("単なる広告行").is_err());
    }

    #[test]
    fn test_first_search_image() {
        let html = r#"<img class="s-image" src="https://m.media-amazon.com/I/81a.jpg"/>"#;
        assert_eq!(
            first_search_image(html).as_deref(),
            Some("https://m.media-amazon.com/I/81a.jpg")
        );
        assert!(first_search_image("<div></div>").is_none());
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
                authors: vec!["藤本 タツキ".to_string()],
                publishers: vec!["集英社".to_string()],
                volume: query.volume,
                image_url: None,
            })
        }
    }

    fn scraper(pages: HashMap<String, String>, resolver_fails: bool) -> ShosekiScraper {
        let resolver = Arc::new(CannedResolver { fail: resolver_fails });
        ShosekiScraper::new(
            Arc::new(CannedPages { pages }),
            resolver.clone(),
            resolver,
            Arc::new(NullImageStore),
        )
    }

    fn chart_pages(post: &str) -> HashMap<String, String> {
        HashMap::from([
            (INDEX_URL.to_string(), INDEX.to_string()),
            (
                "http://shosekiranking.blog.fc2.com/blog-entry-299.html".to_string(),
                post.to_string(),
            ),
        ])
    }

    #[tokio::test]
    async fn test_rank_falls_back_to_list_position() {
        // The second entry's rank line is a placeholder glyph.
        let post = r#"
            <div class="content"><div class="entry_body">
              １<br>9784088831060<br>ワンピース 103 集英社 2022.8.4<br>
              ※<br>9784088832715<br>チェンソーマン 11 集英社 2022.3.4<br>
            </div></div>
        "#;
        let scraper = scraper(chart_pages(post), false);
        let contents = scraper
            .get_data(date(2022, 10, 4))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0].rating, 1);
        assert_eq!(contents[1].rating, 2);
    }

    #[tokio::test]
    async fn test_resolver_failure_keeps_the_original_title() {
        let scraper = scraper(chart_pages(POST), true);
        let contents = scraper
            .get_data(date(2022, 10, 4))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(contents[0].name, "ワンピース");
        assert!(contents[0].authors.is_empty());
        assert!(contents[0].publishers.is_empty());
        // The volume still comes from the chart line itself.
        assert_eq!(contents[0].volume, Some(103));
    }

    #[tokio::test]
    async fn test_unlisted_date_has_no_chart() {
        let scraper = scraper(chart_pages(POST), false);
        assert!(
            scraper
                .get_data(date(2022, 10, 5))
                .await
                .unwrap()
                .is_none()
        );
    }
}
