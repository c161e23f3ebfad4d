//! # manga_charts
//!
//! Scrapes weekly manga sales-ranking charts from Oricon and the Shoseki
//! ranking blog, cross-references each ranked title against MangaUpdates,
//! Amazon and CDJapan to recover canonical names, authors, publishers,
//! volumes and cover images, and persists the normalized records one chart
//! date at a time.
//!
//! ## Pipeline
//!
//! 1. Pick the scan direction and find the next unprocessed chart date
//! 2. Scrape the chart pages for that date and extract every ranked entry
//! 3. Resolve each entry's metadata and cover via the auxiliary sources
//! 4. Persist the date as one atomic week, with rank deltas against the
//!    previous week
//! 5. Repeat until the source runs out of dates in that direction
//!
//! A scheduler invokes this binary on a weekly cadence; failed dates are
//! never committed, so the next run retries them naturally.

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod cli;
mod error;
mod fetch;
mod images;
mod matching;
mod models;
mod orchestrator;
mod resolvers;
mod scrapers;
mod storage;
mod utils;

use cli::{Cli, SourceArg};
use error::ScrapeResult;
use fetch::{FetchConfig, Fetcher};
use images::{FsImageStore, ImageStore};
use orchestrator::Orchestrator;
use resolvers::{AmazonResolver, CdJapanCovers, MangaUpdatesResolver, TitleResolver};
use scrapers::{ChartScraper, OriconScraper, ShosekiScraper};
use storage::{ChartStore, MemoryStore};
use utils::parse_flexible_date;

#[tokio::main]
async fn main() -> ScrapeResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Cli::parse();
    let start = args.date.as_deref().map(parse_flexible_date).transpose()?;

    // ---- Shared infrastructure ----
    let fetcher = Arc::new(
        Fetcher::connect(&FetchConfig {
            proxy_api_url: args.proxy_api_url.clone(),
            user_agent: args.user_agent.clone(),
            max_rate_limit_retries: args.max_rate_limit_retries,
        })
        .await?,
    );
    let images: Arc<dyn ImageStore> = Arc::new(FsImageStore::new(&args.image_dir));
    let store: Arc<dyn ChartStore> = Arc::new(MemoryStore::seeded());

    // ---- Resolvers and scrapers, wired once ----
    let manga_updates: Arc<dyn TitleResolver> =
        Arc::new(MangaUpdatesResolver::new(fetcher.clone()));
    let amazon = Arc::new(AmazonResolver::new(fetcher.clone()));
    let covers = Arc::new(CdJapanCovers::new(fetcher.clone()));

    let mut chart_scrapers: Vec<Box<dyn ChartScraper>> = Vec::new();
    if matches!(args.source, SourceArg::Oricon | SourceArg::All) {
        chart_scrapers.push(Box::new(OriconScraper::new(
            fetcher.clone(),
            manga_updates.clone(),
            covers.clone(),
            images.clone(),
        )));
    }
    if matches!(args.source, SourceArg::Shoseki | SourceArg::All) {
        chart_scrapers.push(Box::new(ShosekiScraper::new(
            fetcher.clone(),
            manga_updates.clone(),
            amazon.clone(),
            images.clone(),
        )));
    }

    // ---- Run every source; one source's failure never stops the others ----
    let orchestrator = Orchestrator::new(store.clone(), images.clone());
    for scraper in &chart_scrapers {
        match orchestrator.execute_scraper(scraper.as_ref(), start).await {
            Ok(weeks) => info!(
                source = scraper.source(),
                weeks, "source run completed"
            ),
            Err(err) => error!(
                source = scraper.source(),
                error = %err,
                "source run failed; remaining sources continue"
            ),
        }
    }

    // ---- Run summary: ingested coverage per source ----
    for scraper in &chart_scrapers {
        let groups = store
            .weeks_grouped(scraper.source(), scraper.source_type())
            .await?;
        for year in &groups {
            for month in &year.months {
                info!(
                    source = scraper.source(),
                    year = year.year,
                    month = %month.name,
                    days = ?month.days,
                    "ingested chart dates"
                );
            }
        }
    }

    Ok(())
}
