use snare_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The element went away between lookup and use.
    #[error("Stale element: {0}")]
    StaleElement(String),

    #[error("Unexpected alert: {0}")]
    UnexpectedAlert(String),

    #[error("Not supported by this session: {0}")]
    Unsupported(String),

    #[error("Not allowed: {0}")]
    NotAllowed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("File watch error: {0}")]
    WatchError(#[from] notify::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ScanError>;
