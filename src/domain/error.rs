//! Domain error types.

use chrono::NaiveDate;
use std::fmt;

/// Why a single symbol could not be served by the data provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("symbol not found")]
    NotFound,

    #[error("data rejected as stale by provider")]
    Stale,

    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Other(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Top-level error type for vantage.
#[derive(Debug, thiserror::Error)]
pub enum VantageError {
    #[error(
        "screening data unavailable for universe {universe_id} on {date}: resolved {resolved} of {population} assets, need {required_fraction:.2}"
    )]
    ScreeningDataUnavailable {
        universe_id: String,
        date: NaiveDate,
        resolved: usize,
        population: usize,
        required_fraction: f64,
    },

    #[error("no snapshot available for universe {universe_id} on or before {date}")]
    NoSnapshotAvailable { universe_id: String, date: NaiveDate },

    #[error("snapshot already exists for universe {universe_id} on {date}")]
    SnapshotExists { universe_id: String, date: NaiveDate },

    #[error("insufficient history for {indicator}: have {available} bars, need {required}")]
    InsufficientHistory {
        indicator: String,
        required: usize,
        available: usize,
    },

    #[error("dataset {handle} is stale: universe {universe_id} has newer snapshots")]
    DatasetStale { handle: String, universe_id: String },

    #[error("data fetch failed for {} of {requested} symbols", missing.len())]
    PartialFetchFailure {
        requested: usize,
        missing: Vec<String>,
    },

    #[error("backtest step failed on {date}: {reason}")]
    BacktestStepFailure { date: NaiveDate, reason: String },

    #[error("universe not found: {0}")]
    UniverseNotFound(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("backtest not found: {0}")]
    BacktestNotFound(String),

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("data provider error: {reason}")]
    Gateway { reason: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl VantageError {
    pub fn invalid(reason: impl fmt::Display) -> Self {
        VantageError::InvalidRequest {
            reason: reason.to_string(),
        }
    }

    pub fn query(err: impl fmt::Display) -> Self {
        VantageError::DatabaseQuery {
            reason: err.to_string(),
        }
    }
}

impl From<r2d2::Error> for VantageError {
    fn from(err: r2d2::Error) -> Self {
        VantageError::Database {
            reason: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for VantageError {
    fn from(err: rusqlite::Error) -> Self {
        VantageError::query(err)
    }
}

impl From<serde_json::Error> for VantageError {
    fn from(err: serde_json::Error) -> Self {
        VantageError::DatabaseQuery {
            reason: format!("payload encoding: {err}"),
        }
    }
}

impl From<&VantageError> for std::process::ExitCode {
    fn from(err: &VantageError) -> Self {
        let code: u8 = match err {
            VantageError::Io(_) | VantageError::Cancelled => 1,
            VantageError::ConfigParse { .. }
            | VantageError::ConfigMissing { .. }
            | VantageError::ConfigInvalid { .. } => 2,
            VantageError::Database { .. } | VantageError::DatabaseQuery { .. } => 3,
            VantageError::InvalidRequest { .. }
            | VantageError::UniverseNotFound(_)
            | VantageError::DatasetNotFound(_)
            | VantageError::BacktestNotFound(_)
            | VantageError::SnapshotExists { .. } => 4,
            VantageError::ScreeningDataUnavailable { .. }
            | VantageError::NoSnapshotAvailable { .. }
            | VantageError::InsufficientHistory { .. }
            | VantageError::PartialFetchFailure { .. }
            | VantageError::Gateway { .. }
            | VantageError::DatasetStale { .. } => 5,
            VantageError::BacktestStepFailure { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
