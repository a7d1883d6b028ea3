use thiserror::Error;

/// Failures that abort a load. Lookups never produce these; a missing country,
/// date or colour is an ordinary `None`/fallback value.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("One or more datasets are empty or invalid: {source_name}")]
    EmptySource { source_name: String },

    #[error("Data file not found: {path}")]
    MissingFile { path: String },

    #[error("Failed to parse CSV: {0}")]
    Csv(String),

    #[error("Request failed: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<polars::error::PolarsError> for DataError {
    fn from(err: polars::error::PolarsError) -> Self {
        DataError::Csv(err.to_string())
    }
}

impl From<reqwest::Error> for DataError {
    fn from(err: reqwest::Error) -> Self {
        DataError::Http(err.to_string())
    }
}

impl From<serde_yaml::Error> for DataError {
    fn from(err: serde_yaml::Error) -> Self {
        DataError::Config(err.to_string())
    }
}

pub type DataResult<T> = Result<T, DataError>;
