//! HTTP error responses for the web adapter.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::domain::error::VantageError;

#[derive(Debug)]
pub struct WebError {
    pub status: StatusCode,
    pub message: String,
}

impl WebError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

pub fn status_from_error(err: &VantageError) -> StatusCode {
    match err {
        VantageError::UniverseNotFound(_)
        | VantageError::DatasetNotFound(_)
        | VantageError::BacktestNotFound(_)
        | VantageError::NoSnapshotAvailable { .. } => StatusCode::NOT_FOUND,
        VantageError::SnapshotExists { .. } => StatusCode::CONFLICT,
        VantageError::ScreeningDataUnavailable { .. }
        | VantageError::InsufficientHistory { .. }
        | VantageError::PartialFetchFailure { .. }
        | VantageError::BacktestStepFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        VantageError::InvalidRequest { .. }
        | VantageError::ConfigMissing { .. }
        | VantageError::ConfigInvalid { .. }
        | VantageError::ConfigParse { .. } => StatusCode::BAD_REQUEST,
        VantageError::DatasetStale { .. }
        | VantageError::Cancelled
        | VantageError::Gateway { .. }
        | VantageError::Database { .. }
        | VantageError::DatabaseQuery { .. }
        | VantageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<VantageError> for WebError {
    fn from(err: VantageError) -> Self {
        Self::new(status_from_error(&err), err.to_string())
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), error = %self.message, "request failed");
        }
        let body = json!({
            "error": self.message,
            "status": self.status.as_u16(),
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn status_mapping() {
        let date = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        assert_eq!(
            status_from_error(&VantageError::UniverseNotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_from_error(&VantageError::SnapshotExists {
                universe_id: "x".into(),
                date
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_from_error(&VantageError::PartialFetchFailure {
                requested: 1,
                missing: vec!["A".into()]
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_from_error(&VantageError::invalid("bad")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_from_error(&VantageError::Database { reason: "x".into() }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
