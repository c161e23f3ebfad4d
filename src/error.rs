//! Crate-wide error type shared by the fetch, scraping and storage layers.

use thiserror::Error;

/// Alias used by every fallible operation in the crate.
pub type ScrapeResult<T> = Result<T, ScrapeError>;

/// All the ways a scrape run can fail.
///
/// `NotFound` is a routine signal: absent chart dates and resolver misses
/// produce it, and callers recover from it. Everything else aborts the
/// current chart date and is surfaced by the orchestrator.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The requested page or resolver candidate does not exist.
    #[error("not found")]
    NotFound,

    /// The server kept answering with an unusable status, or a retry budget ran out.
    #[error("request gave up: {0}")]
    Unsuccessful(String),

    /// Transport-level failure after exhausting every configured proxy.
    #[error("connection failed: {0}")]
    Connect(String),

    /// A response post-processing command that does not fit the pipeline stage.
    #[error("incorrect fetch command: {0}")]
    IncorrectCommand(String),

    /// The page did not have the structure the extractor relies on.
    #[error("unexpected page structure: {0}")]
    Structure(String),

    /// The chart store or image sink rejected an operation.
    #[error("storage failure: {0}")]
    Storage(String),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        ScrapeError::Connect(err.to_string())
    }
}

impl From<std::io::Error> for ScrapeError {
    fn from(err: std::io::Error) -> Self {
        ScrapeError::Storage(err.to_string())
    }
}
