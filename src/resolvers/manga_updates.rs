//! MangaUpdates title resolver.
//!
//! The community wiki is the primary source for canonical English names:
//! a search by the chart's source-language title yields a result listing,
//! the closest candidate's detail page yields the display title, authors
//! and the original publisher, plus a cover URL.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::error::{ScrapeError, ScrapeResult};
use crate::fetch::Fetcher;
use crate::matching::{closest_candidate, volume_matches, within_publication_window, CandidateEntry};
use crate::resolvers::{AuxRecord, TitleQuery, TitleResolver};

const SEARCH_URL: &str =
    "https://www.mangaupdates.com/series.html?filter=no_oneshots&type=manga&perpage=10&search=";

static RESULT_CELL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.col-12.col-lg-6.p-3.text").unwrap());
static CELL_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("div.text b").unwrap());
static CELL_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("div.text a[href]").unwrap());
static SERIES_TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span.releasestitle.tabletitle").unwrap());
static BOLD: Lazy<Selector> = Lazy::new(|| Selector::parse("b").unwrap());
static UNDERLINED: Lazy<Selector> = Lazy::new(|| Selector::parse("u").unwrap());
static SERIES_IMAGE: Lazy<Selector> = Lazy::new(|| Selector::parse("img.img-fluid").unwrap());

/// Resolver backed by mangaupdates.com.
pub struct MangaUpdatesResolver {
    fetcher: Arc<Fetcher>,
}

impl MangaUpdatesResolver {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl TitleResolver for MangaUpdatesResolver {
    #[instrument(level = "debug", skip_all, fields(title = %query.title))]
    async fn resolve(&self, query: &TitleQuery) -> ScrapeResult<AuxRecord> {
        let search_url = format!("{SEARCH_URL}{}", urlencoding::encode(&query.title));
        let listing = self.fetcher.fetch_text(&search_url).await?;

        let mut candidates = search_candidates(&listing);
        candidates.retain(|c| volume_matches(query.volume, c.volume));
        candidates.retain(|c| within_publication_window(query.release_date, c.publication_date));
        let best = closest_candidate(&query.title, &candidates).ok_or(ScrapeError::NotFound)?;
        debug!(candidate = %best.title, link = %best.link, "picked series candidate");

        let detail = self.fetcher.fetch_text(&best.link).await?;
        Ok(series_record(&detail, &query.title))
    }
}

/// Pull `(index, title, link)` candidates out of the search listing.
fn search_candidates(html: &str) -> Vec<CandidateEntry> {
    let document = Html::parse_document(html);
    let mut candidates = Vec::new();
    for (index, cell) in document.select(&RESULT_CELL).enumerate() {
        let Some(title) = cell.select(&CELL_TITLE).next() else {
            continue;
        };
        let Some(link) = cell
            .select(&CELL_LINK)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };
        let title: String = title.text().collect::<String>().trim().to_string();
        if title.is_empty() {
            continue;
        }
        candidates.push(CandidateEntry {
            index,
            title,
            volume: None,
            link: link.to_string(),
            publication_date: None,
        });
    }
    candidates
}

/// Extract the metadata record from a series detail page.
///
/// Every field degrades independently; a page missing its title block falls
/// back to the query title so the caller still gets a usable name.
fn series_record(html: &str, fallback_title: &str) -> AuxRecord {
    let document = Html::parse_document(html);
    let name = document
        .select(&SERIES_TITLE)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| fallback_title.to_string());
    let image_url = document
        .select(&SERIES_IMAGE)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(str::to_string);
    AuxRecord {
        name,
        authors: labeled_names(&document, "Author(s)"),
        publishers: labeled_names(&document, "Original Publisher"),
        volume: None,
        image_url,
    }
}

/// Series pages lay out metadata as `<div><b>Label</b></div><div><u>value</u>…</div>`;
/// find the label's block and read the underlined names from its sibling.
fn labeled_names(document: &Html, label: &str) -> Vec<String> {
    for bold in document.select(&BOLD) {
        let text: String = bold.text().collect();
        if text.trim() != label {
            continue;
        }
        let Some(block) = bold.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        let mut node = block.next_sibling();
        while let Some(sibling) = node {
            if let Some(el) = ElementRef::wrap(sibling) {
                return el
                    .select(&UNDERLINED)
                    .map(|u| u.text().collect::<String>().trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect();
            }
            node = sibling.next_sibling();
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <div class="col-12 col-lg-6 p-3 text">
          <div class="text">
            <a href="https://www.mangaupdates.com/series/1"><b>One Piece</b></a>
          </div>
        </div>
        <div class="col-12 col-lg-6 p-3 text">
          <div class="text">
            <a href="https://www.mangaupdates.com/series/2"><b>One Punch-Man</b></a>
          </div>
        </div>
        <div class="col-12 col-lg-6 p-3 text">
          <div class="text"><b>No Link Here</b></div>
        </div>
    "#;

    const SERIES: &str = r#"
        <span class="releasestitle tabletitle">SPY x FAMILY</span>
        <div class="sCat"><b>Author(s)</b></div>
        <div class="sContent"><a><u>ENDO Tatsuya</u></a></div>
        <div class="sCat"><b>Original Publisher</b></div>
        <div class="sContent"><a><u>Shueisha</u></a></div>
        <img class="img-fluid" src="https://cdn.mangaupdates.com/image/spy.jpg"/>
    "#;

    #[test]
    fn test_listing_yields_linked_candidates_only() {
        let candidates = search_candidates(LISTING);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].title, "One Piece");
        assert_eq!(candidates[0].link, "https://www.mangaupdates.com/series/1");
        assert_eq!(candidates[1].index, 1);
    }

    #[test]
    fn test_series_record_extracts_all_fields() {
        let record = series_record(SERIES, "SPY×FAMILY");
        assert_eq!(record.name, "SPY x FAMILY");
        assert_eq!(record.authors, vec!["ENDO Tatsuya"]);
        assert_eq!(record.publishers, vec!["Shueisha"]);
        assert_eq!(
            record.image_url.as_deref(),
            Some("https://cdn.mangaupdates.com/image/spy.jpg")
        );
    }

    #[test]
    fn test_missing_title_falls_back_to_query() {
        let record = series_record("<div></div>", "ワンピース");
        assert_eq!(record.name, "ワンピース");
        assert!(record.authors.is_empty());
        assert!(record.publishers.is_empty());
        assert!(record.image_url.is_none());
    }

    #[test]
    fn test_unrelated_labels_are_ignored() {
        let html = r#"
            <div><b>Artist(s)</b></div>
            <div><u>Somebody Else</u></div>
        "#;
        let document = Html::parse_document(html);
        assert!(labeled_names(&document, "Author(s)").is_empty());
    }
}
