//! Typed errors for the analysis pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("column '{0}' not found in table")]
    MissingColumn(String),

    #[error("currency '{0}' has no ISO code mapping")]
    UnmappedCurrency(String),

    #[error("no USD rate for currency code '{0}'")]
    MissingRate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
