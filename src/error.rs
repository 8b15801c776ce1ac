use thiserror::Error;

/// Failures of one unit of ladder work. Each variant stays local to the unit
/// it describes: a field, a row, a page, or a single store write.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("page {page} could not be downloaded: {reason}")]
    TransientFetch { page: u32, reason: String },

    #[error("page {page} could not be parsed: {reason}")]
    Parse { page: u32, reason: String },

    #[error("field `{field}` has unusable text {text:?}")]
    FieldExtraction { field: &'static str, text: String },

    #[error("link {0:?} does not carry a profile and character id")]
    IdentityExtraction(String),

    #[error("store write failed: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("run cancelled")]
    Cancelled,
}

impl ScrapeError {
    pub fn fetch(page: u32, reason: impl ToString) -> Self {
        Self::TransientFetch {
            page,
            reason: reason.to_string(),
        }
    }
}

/// Text that none of the numeric normalizers accept.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("not a number: {0:?}")]
pub struct InvalidNumber(pub String);
