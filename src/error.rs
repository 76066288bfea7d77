//! Error types for the simulation engine.

use chrono::NaiveDate;
use thiserror::Error;

/// Main error type for the simulation engine.
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Insufficient history before {date}: window needs {required} rows, only {available} available")]
    InsufficientHistory {
        date: NaiveDate,
        required: usize,
        available: usize,
    },

    #[error("Unknown covariance estimator: '{0}' (expected 'sample' or 'ledoit_wolf')")]
    UnknownEstimator(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Optimization error: {0}")]
    OptimizationError(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Result type alias for simulation operations.
pub type Result<T> = std::result::Result<T, SimulationError>;
