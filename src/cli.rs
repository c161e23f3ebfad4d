//! Command-line interface definitions for the chart scraper.
//!
//! All options can be passed as flags; the proxy API endpoint also reads
//! from the environment, which is how the scheduled deployment supplies it.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Which ranking sources a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    Oricon,
    Shoseki,
    All,
}

/// Command-line arguments for the chart scraper.
///
/// # Examples
///
/// ```sh
/// # Scrape both sources, resuming from the stored last date
/// manga_charts
///
/// # Backfill one source starting from an explicit chart date
/// manga_charts --source oricon --date 2022-08-09
///
/// # Route traffic through rented proxies
/// PROXY_API_URL=https://proxy.example.com manga_charts
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Ranking source to scrape
    #[arg(long, value_enum, default_value_t = SourceArg::All)]
    pub source: SourceArg,

    /// Explicit chart date to ingest first (YYYY-MM-DD); defaults to
    /// resuming from the last ingested date
    #[arg(long)]
    pub date: Option<String>,

    /// Directory where cover images are written
    #[arg(long, default_value = "./images")]
    pub image_dir: PathBuf,

    /// Base URL of the proxy-rental API; direct connections only when unset
    #[arg(long, env = "PROXY_API_URL")]
    pub proxy_api_url: Option<String>,

    /// Override the browser-like default User-Agent
    #[arg(long)]
    pub user_agent: Option<String>,

    /// How many HTTP 429 responses to absorb per request before giving up
    #[arg(long, default_value_t = 5)]
    pub max_rate_limit_retries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["manga_charts"]);
        assert_eq!(cli.source, SourceArg::All);
        assert_eq!(cli.date, None);
        assert_eq!(cli.image_dir, PathBuf::from("./images"));
        assert_eq!(cli.max_rate_limit_retries, 5);
    }

    #[test]
    fn test_cli_source_and_date() {
        let cli = Cli::parse_from([
            "manga_charts",
            "--source",
            "oricon",
            "--date",
            "2022-08-09",
            "--image-dir",
            "/var/covers",
        ]);
        assert_eq!(cli.source, SourceArg::Oricon);
        assert_eq!(cli.date.as_deref(), Some("2022-08-09"));
        assert_eq!(cli.image_dir, PathBuf::from("/var/covers"));
    }

    #[test]
    fn test_cli_rejects_unknown_source() {
        assert!(Cli::try_parse_from(["manga_charts", "--source", "bookwalker"]).is_err());
    }
}
