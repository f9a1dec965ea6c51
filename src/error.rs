//! Error types shared by every decoder and fetcher in the crate.
//!
//! Errors are only ever seen below the tile-cache boundary. The caches turn a
//! failed load into a "missing" tile and the sources turn a permanent failure
//! into an "unavailable" source, so sampling calls never return these.

use thiserror::Error;

/// Errors produced while fetching or decoding geodata.
#[derive(Debug, Error)]
pub enum GeoDataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed with status {status}")]
    Http { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid TIFF: {0}")]
    TiffFormat(String),

    #[error("unsupported TIFF compression {0}")]
    UnsupportedCompression(u16),

    #[error("missing required TIFF tag {0}")]
    MissingTag(u16),

    #[error("invalid tile archive: {0}")]
    ArchiveFormat(String),

    #[error("unsupported tile archive version {0}")]
    UnsupportedVersion(u8),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("image error: {0}")]
    Image(String),
}

impl GeoDataError {
    /// Whether retrying can never succeed for the same input.
    ///
    /// Structural problems with a file or archive are permanent; network and
    /// per-tile decode failures are not.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            GeoDataError::TiffFormat(_)
                | GeoDataError::UnsupportedCompression(_)
                | GeoDataError::MissingTag(_)
                | GeoDataError::ArchiveFormat(_)
                | GeoDataError::UnsupportedVersion(_)
        )
    }
}

impl From<reqwest::Error> for GeoDataError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => GeoDataError::Http {
                status: status.as_u16(),
            },
            None => GeoDataError::Transport(err.to_string()),
        }
    }
}

impl From<image::ImageError> for GeoDataError {
    fn from(err: image::ImageError) -> Self {
        GeoDataError::Image(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GeoDataError>;
