use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("schema error: {0}")]
    Schema(String),

    #[error("column '{column}' not found in catalog '{catalog}'")]
    MissingColumn { catalog: String, column: String },

    #[error("malformed source file {path}: {reason}")]
    MalformedSource { path: String, reason: String },

    #[error("no transformation from {family} to {band}")]
    UnsupportedTransform { family: String, band: String },

    #[error("keyword {keyword} missing from image header {path}")]
    MissingHeaderKeyword { path: String, keyword: String },

    #[error("fit error: {0}")]
    Fit(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("FITS error: {0}")]
    Fits(#[from] celestial_fits::FitsError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn missing_column(catalog: &str, column: &str) -> Self {
        Self::MissingColumn {
            catalog: catalog.to_string(),
            column: column.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
