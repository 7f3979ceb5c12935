//! Error types for image discovery and replacement

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// PDF processing error
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A single image could not be decoded for comparison
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// A page's operator stream is malformed
    #[error("Malformed content stream on page {page}: {reason}")]
    ContentStream { page: u32, reason: String },

    /// A replacement run is already active on the document
    #[error("A replacement run is already active on this document")]
    Busy,

    /// The document was closed or became unusable while a run was active
    #[error("Document handle is closed or no longer usable")]
    DocumentClosed,

    /// A replacement image could not be built
    #[error("Failed to encode replacement image: {0}")]
    Encode(String),

    /// JPEG quality outside 1..=100
    #[error("Quality must be between 1 and 100, got {0}")]
    InvalidQuality(u8),

    /// Page number not present in the document
    #[error("Page {0} not found")]
    PageNotFound(u32),

    /// Image name not present on the requested page
    #[error("Image not found: {0}")]
    ImageNotFound(String),
}

impl Error {
    /// Per-page or per-image failures that are counted rather than aborting a run
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Decode(_) | Error::ContentStream { .. } | Error::Pdf(_)
        )
    }
}
