use thiserror::Error;

/// Failures surfaced to the user while extracting or downloading a book.
#[derive(Debug, Error)]
pub enum HelperError {
    /// The chapter list is present on the page but is not valid JSON,
    /// even after the placeholder repair.
    #[error("Could not extract book chapters: {0}")]
    Extraction(#[from] serde_json::Error),

    #[error("Could not download chapter \"{name}\".")]
    ChapterDownload { name: String },

    #[error("Could not add zip entry for \"{name}\": both media hosts failed")]
    ChapterFetch { name: String },

    #[error("Could not add zip entry: cover image {url} could not be fetched")]
    CoverFetch { url: String },

    #[error("Could not save zip archive: {0}")]
    Packaging(String),

    #[error("Could not save \"{name}\": {source}")]
    Save {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not load book page {url}: {reason}")]
    Page { url: String, reason: String },
}

impl From<zip::result::ZipError> for HelperError {
    fn from(e: zip::result::ZipError) -> Self {
        HelperError::Packaging(e.to_string())
    }
}
