//! Error types for the baseline engine and its adapters

use chrono::NaiveDate;
use thiserror::Error;

/// Errors that can occur around baseline computation.
///
/// The statistics themselves never fail: missing or degenerate data shows up as
/// `None` fields. These variants cover parsing, configuration and lookups.
#[derive(Debug, Error)]
pub enum BaselineError {
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parse error: {0}")]
    DateParseError(String),

    #[error("Unknown metric column: {0}")]
    UnknownColumn(String),

    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No metrics found for user {user}")]
    NoMetrics { user: String },

    #[error("No metrics row for user {user} on {day}")]
    NoRowForDay { user: String, day: NaiveDate },

    #[error("Metric source error: {0}")]
    Source(String),
}
