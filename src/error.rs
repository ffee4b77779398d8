use thiserror::Error;

/// Why a single fetch (static or rendered) produced no rows.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("no rows matched the row selector")]
    EmptyResultSet,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid selector `{0}`")]
    InvalidSelector(String),

    #[error("browser launch failed: {0}")]
    LaunchFailure(String),

    #[error("navigation timed out: {0}")]
    NavigationTimeout(String),

    #[error("selector `{0}` did not appear in time")]
    SelectorTimeout(String),

    #[error("row extraction failed: {0}")]
    Extraction(String),

    #[error("scrape cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::Status(status.as_u16()),
            None => FetchError::Network(err.to_string()),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScrapeError {
    #[error("unknown site: {0}")]
    UnknownSite(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
