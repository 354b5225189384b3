/// Error types shared by the retrieval, unit and pooling modules.
///
/// Empty results are never errors: a retriever that finds nothing returns an
/// empty iterator. Nothing here is retried; every failure propagates to the
/// caller that asked for the data.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Unit errors
// ---------------------------------------------------------------------------

/// Raised when a measurement unit cannot be resolved or converted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnitError {
    #[error("no unit conversion available: {0}")]
    NoUnitConversion(String),
}

// ---------------------------------------------------------------------------
// Retrieval errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetrievalError {
    /// The retriever variant has no stable per-series identifier.
    #[error("{0}")]
    UnsupportedIdentifierAccess(String),

    #[error(transparent)]
    NoUnitConversion(#[from] UnitError),

    /// Query or connection failure in the backing store.
    #[error("store error: {0}")]
    Store(String),

    /// Rows that cannot form a valid time-series (duplicate valid times,
    /// inconsistent time scales, ensemble member mismatch).
    #[error("invalid time-series: {0}")]
    InvalidSeries(String),

    /// A feature, unit or ensemble id unknown to the store.
    #[error("missing identity: {0}")]
    MissingIdentity(String),

    #[error("invalid declaration: {0}")]
    Declaration(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),
}

impl From<postgres::Error> for RetrievalError {
    fn from(err: postgres::Error) -> Self {
        RetrievalError::Store(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML declaration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to parse JSON declaration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("environment variable {0} must be set")]
    MissingEnv(String),

    #[error("invalid declaration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for RetrievalError {
    fn from(err: ConfigError) -> Self {
        RetrievalError::Declaration(err.to_string())
    }
}
