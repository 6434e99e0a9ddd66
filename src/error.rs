use thiserror::Error;

/// Failure while fetching a page of albums.
///
/// Distinct from "no more albums": the feed keeps what it already loaded
/// and returns to idle so a later scroll can retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("server error {code}: {message}")]
    Api { code: i32, message: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("album source went away mid-page")]
    Disconnected,
}

/// Failure while fetching an album thumbnail. Never shown to the user.
#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("server error {code}: {message}")]
    Api { code: i32, message: String },
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while loading or saving the configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid color {0:?}, expected #rrggbb")]
    InvalidColor(String),
}

impl From<FetchError> for ThumbnailError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Api { code, message } => ThumbnailError::Api { code, message },
            other => ThumbnailError::Http(other.to_string()),
        }
    }
}
