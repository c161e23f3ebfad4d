//! Amazon.co.jp storefront resolver.
//!
//! The blog-style chart lists an ISBN per entry; searching the storefront by
//! that ISBN recovers what the chart line omits: the volume number, a
//! publication date to sanity-check candidates against, and a cover image.
//! Result titles decorate the name with brackets, full-width parentheses and
//! the occasional Roman-numeral volume, so candidate parsing is regex-heavy.

use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::{ScrapeError, ScrapeResult};
use crate::fetch::{FetchCommand, Fetcher};
use crate::matching::{closest_candidate, volume_matches, within_publication_window, CandidateEntry};
use crate::resolvers::{AuxRecord, TitleQuery, TitleResolver};
use crate::utils::parse_volume_token;

const BASE_URL: &str = "https://www.amazon.co.jp";

/// Result title shapes: `名前 12巻 (ジャンプコミックス)`, `Name (14) 【特典付き】 (...)`.
static RESULT_TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<title>.+?)\s?(?:\s|（|\()?(?P<volume>\d+|[MDCLXVI]+)?(?:\)|）)?巻?(?:【.+】)?\s?(?:\(|（).*(?:\)|）)",
    )
    .unwrap()
});

/// Explicit volume marker in the result's detail row.
static VOLUME_LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Volume\s(?P<volume>\d+)\s").unwrap());

static RESULT_BLOCK: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        "div#search div.a-section.a-spacing-none.puis-padding-right-small.s-title-instructions-style",
    )
    .unwrap()
});
static RESULT_TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span.a-size-medium.a-color-base.a-text-normal").unwrap());
static RESULT_ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("div.a-row").unwrap());
static RESULT_VOLUME_LINK: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("a.a-link-normal.s-underline-text.s-underline-link-text.s-link-style").unwrap()
});
static ROW_SPAN: Lazy<Selector> = Lazy::new(|| Selector::parse("span").unwrap());
static AUTHOR_BLOCK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.singleAuthorSection h2").unwrap());
static PUBLISHER_BLOCK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div#rpi-attribute-book_details-publisher span").unwrap());
static PRODUCT_IMAGE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img#ebooksImgBlkFront").unwrap());

/// Resolver backed by amazon.co.jp book search.
pub struct AmazonResolver {
    fetcher: Arc<Fetcher>,
}

impl AmazonResolver {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl TitleResolver for AmazonResolver {
    #[instrument(level = "debug", skip_all, fields(title = %query.title, isbn = ?query.isbn))]
    async fn resolve(&self, query: &TitleQuery) -> ScrapeResult<AuxRecord> {
        let key = query.isbn.as_deref().unwrap_or(&query.title);
        let search_url = format!(
            "{BASE_URL}/s?k={}&i=stripbooks&s=date-desc-rank",
            urlencoding::encode(key)
        );
        // The storefront rate-limits search traffic hard; start the 429
        // backoff higher than the default.
        let listing = self
            .fetcher
            .fetch_with_delay(
                &search_url,
                &[FetchCommand::ReadBytes, FetchCommand::DecodeText],
                Duration::from_secs(3),
            )
            .await?
            .into_text()?;

        let mut candidates = search_candidates(&listing);
        candidates.retain(|c| volume_matches(query.volume, c.volume));
        candidates.retain(|c| within_publication_window(query.release_date, c.publication_date));
        let best = closest_candidate(&query.title, &candidates)
            .cloned()
            .ok_or(ScrapeError::NotFound)?;
        debug!(candidate = %best.title, volume = ?best.volume, "picked storefront candidate");

        let detail = self.fetcher.fetch_text(&best.link).await?;
        let (authors, publishers, image_url) = product_record(&detail);
        Ok(AuxRecord {
            // The storefront only knows the source-language name.
            name: query.title.clone(),
            authors,
            publishers,
            volume: best.volume.or(query.volume),
            image_url,
        })
    }
}

/// Parse the search listing into ranked candidates.
fn search_candidates(html: &str) -> Vec<CandidateEntry> {
    let document = Html::parse_document(html);
    let mut candidates = Vec::new();
    for (index, block) in document.select(&RESULT_BLOCK).enumerate() {
        let Some(title_el) = block.select(&RESULT_TITLE).next() else {
            continue;
        };
        let full_title: String = title_el.text().collect();
        let Some(caps) = RESULT_TITLE_RE.captures(full_title.trim()) else {
            continue;
        };
        let Some(link) = title_el
            .parent()
            .and_then(ElementRef::wrap)
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };
        let row = block.select(&RESULT_ROW).next();
        let volume = row
            .and_then(explicit_volume)
            .or_else(|| caps.name("volume").and_then(|m| parse_volume_token(m.as_str())));
        candidates.push(CandidateEntry {
            index,
            title: caps["title"].trim().to_string(),
            volume,
            link: absolute_link(link),
            publication_date: row.and_then(row_publication_date),
        });
    }
    candidates
}

/// The detail row sometimes leads with a "Volume N" navigation link, which
/// beats whatever the decorated title says.
fn explicit_volume(row: ElementRef<'_>) -> Option<u32> {
    let link = row.select(&RESULT_VOLUME_LINK).next()?;
    let text: String = link.text().collect();
    VOLUME_LINK_RE
        .captures(&text)
        .and_then(|caps| caps["volume"].parse().ok())
}

/// Publication date from the result row's trailing span, in either the
/// Japanese (`2022/10/4`) or export (`Oct 4, 2022`) storefront format.
fn row_publication_date(row: ElementRef<'_>) -> Option<NaiveDate> {
    let text: String = row.select(&ROW_SPAN).last()?.text().collect();
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y/%m/%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%b %d, %Y"))
        .ok()
}

fn absolute_link(href: &str) -> String {
    if href.starts_with("http") {
        href.to_string()
    } else {
        format!("{BASE_URL}{href}")
    }
}

/// Author, publisher and cover URL from a product page. All optional.
fn product_record(html: &str) -> (Vec<String>, Vec<String>, Option<String>) {
    let document = Html::parse_document(html);
    let authors = document
        .select(&AUTHOR_BLOCK)
        .next()
        .map(|el| vec![el.text().collect::<String>().trim().to_string()])
        .unwrap_or_default();
    let publishers = document
        .select(&PUBLISHER_BLOCK)
        .last()
        .map(|el| vec![el.text().collect::<String>().trim().to_string()])
        .unwrap_or_default();
    let image_url = document
        .select(&PRODUCT_IMAGE)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(str::to_string);
    (authors, publishers, image_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_block(title: &str, date: &str) -> String {
        format!(
            r#"<div class="a-section a-spacing-none puis-padding-right-small s-title-instructions-style">
                 <a href="/dp/123"><span class="a-size-medium a-color-base a-text-normal">{title}</span></a>
                 <div class="a-row"><span>単行本</span><span>{date}</span></div>
               </div>"#
        )
    }

    fn listing(blocks: &[String]) -> String {
        format!(r#"<div id="search">{}</div>"#, blocks.join(""))
    }

    #[test]
    fn test_result_title_regex_captures_volume_forms() {
        let caps = RESULT_TITLE_RE.captures("ワンピース 103 (ジャンプコミックス)").unwrap();
        assert_eq!(&caps["title"], "ワンピース");
        assert_eq!(caps.name("volume").unwrap().as_str(), "103");

        let caps = RESULT_TITLE_RE.captures("Berserk Deluxe XIV巻 (Dark Horse)").unwrap();
        assert_eq!(caps.name("volume").unwrap().as_str(), "XIV");
    }

    #[test]
    fn test_candidates_parse_volume_and_date() {
        let html = listing(&[result_block("ワンピース 103 (ジャンプコミックス)", "2022/8/4")]);
        let candidates = search_candidates(&html);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "ワンピース");
        assert_eq!(candidates[0].volume, Some(103));
        assert_eq!(candidates[0].link, "https://www.amazon.co.jp/dp/123");
        assert_eq!(
            candidates[0].publication_date,
            NaiveDate::from_ymd_opt(2022, 8, 4)
        );
    }

    #[test]
    fn test_roman_volume_converts() {
        let html = listing(&[result_block("Berserk Deluxe XIV巻 (Dark Horse)", "Oct 4, 2022")]);
        let candidates = search_candidates(&html);
        assert_eq!(candidates[0].volume, Some(14));
        assert_eq!(
            candidates[0].publication_date,
            NaiveDate::from_ymd_opt(2022, 10, 4)
        );
    }

    #[test]
    fn test_undecorated_titles_are_skipped() {
        let html = listing(&[result_block("no brackets at all", "2022/8/4")]);
        assert!(search_candidates(&html).is_empty());
    }

    #[test]
    fn test_product_record_fields() {
        let html = r#"
            <div class="a-section a-spacing-top-large singleAuthorSection"><h2>尾田 栄一郎</h2></div>
            <div id="rpi-attribute-book_details-publisher"><span>出版社</span><span>集英社</span></div>
            <img id="ebooksImgBlkFront" src="https://m.media-amazon.com/I/cover.jpg"/>
        "#;
        let (authors, publishers, image) = product_record(html);
        assert_eq!(authors, vec!["尾田 栄一郎"]);
        assert_eq!(publishers, vec!["集英社"]);
        assert_eq!(image.as_deref(), Some("https://m.media-amazon.com/I/cover.jpg"));
    }

    #[test]
    fn test_product_record_tolerates_bare_pages() {
        let (authors, publishers, image) = product_record("<html></html>");
        assert!(authors.is_empty());
        assert!(publishers.is_empty());
        assert!(image.is_none());
    }
}
