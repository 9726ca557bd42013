//! HTTP request handlers for the web adapter.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::domain::calendar::Frequency;
use crate::domain::cancel::CancelFlag;
use crate::domain::criteria::ScreeningCriteria;
use crate::domain::dataset::DatasetSummary;
use crate::domain::dataset_builder::{DatasetRequest, blocking};
use crate::domain::metrics::Metrics;
use crate::domain::service::BacktestRequest;
use crate::domain::universe::Universe;

use super::{AppState, WebError};

/// Cancels in-flight work when the request future is dropped, which is what
/// happens when the client goes away.
struct CancelOnDrop(CancelFlag);

impl CancelOnDrop {
    fn new() -> Self {
        Self(CancelFlag::new())
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn not_found() -> WebError {
    WebError::not_found("no such route")
}

#[derive(Debug, Deserialize)]
pub struct CreateUniverseRequest {
    pub id: String,
    pub owner: String,
    #[serde(default)]
    pub criteria: ScreeningCriteria,
}

pub async fn create_universe(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateUniverseRequest>,
) -> Result<Response, WebError> {
    let universe = Universe::new(request.id, request.owner, request.criteria, Utc::now())
        .map_err(|e| WebError::bad_request(e.to_string()))?;
    let repo = Arc::clone(&state.universes);
    let stored = universe.clone();
    blocking(move || repo.insert_universe(&stored)).await?;
    Ok((StatusCode::CREATED, Json(universe)).into_response())
}

pub async fn get_universe(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Universe>, WebError> {
    let repo = Arc::clone(&state.universes);
    Ok(Json(blocking(move || repo.get_universe(&id)).await?))
}

pub async fn list_universes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Universe>>, WebError> {
    let repo = Arc::clone(&state.universes);
    Ok(Json(blocking(move || repo.list_universes()).await?))
}

/// Replace a universe's current criteria. Existing snapshots keep the
/// criteria they were screened with.
pub async fn update_criteria(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(criteria): Json<ScreeningCriteria>,
) -> Result<Json<Universe>, WebError> {
    criteria
        .validate()
        .map_err(|reason| WebError::bad_request(format!("invalid criteria: {reason}")))?;
    let repo = Arc::clone(&state.universes);
    let universe = blocking(move || {
        repo.update_criteria(&id, &criteria)?;
        repo.get_universe(&id)
    })
    .await?;
    Ok(Json(universe))
}

#[derive(Debug, Deserialize)]
pub struct CreateSnapshotRequest {
    pub date: NaiveDate,
    #[serde(default)]
    pub criteria: Option<ScreeningCriteria>,
}

pub async fn create_snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<CreateSnapshotRequest>,
) -> Result<Response, WebError> {
    let service = Arc::clone(&state.snapshots);
    let snapshot = blocking(move || {
        service.create_snapshot(&id, request.date, request.criteria, Utc::now())
    })
    .await?;
    Ok((StatusCode::CREATED, Json(snapshot)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

pub async fn timeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(range): Query<RangeQuery>,
) -> Result<Response, WebError> {
    let service = Arc::clone(&state.snapshots);
    let snapshots = blocking(move || service.timeline(&id, range.start, range.end)).await?;
    Ok(Json(snapshots).into_response())
}

pub async fn composition(
    State(state): State<Arc<AppState>>,
    Path((id, date)): Path<(String, NaiveDate)>,
) -> Result<Response, WebError> {
    let service = Arc::clone(&state.snapshots);
    let snapshot = blocking(move || service.composition_at(&id, date)).await?;
    Ok(Json(snapshot).into_response())
}

#[derive(Debug, Deserialize)]
pub struct BackfillRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub frequency: Frequency,
}

pub async fn backfill(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<BackfillRequest>,
) -> Result<Response, WebError> {
    let service = Arc::clone(&state.snapshots);
    let report = blocking(move || {
        service.backfill(&id, request.start, request.end, request.frequency, Utc::now())
    })
    .await?;
    Ok(Json(report).into_response())
}

pub async fn complete_dataset(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DatasetRequest>,
) -> Result<Json<DatasetSummary>, WebError> {
    let guard = CancelOnDrop::new();
    let (dataset, cached) = state
        .datasets
        .resolve_or_build(&request, Utc::now(), &guard.0)
        .await?;
    Ok(Json(dataset.summary(cached)))
}

#[derive(Debug, Serialize)]
pub struct BacktestCreated {
    pub id: String,
    pub dataset_handle: String,
    pub metrics: Metrics,
}

pub async fn run_backtest(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BacktestRequest>,
) -> Result<Response, WebError> {
    let guard = CancelOnDrop::new();
    let result = state.backtests.run(&request, Utc::now(), &guard.0).await?;
    let body = BacktestCreated {
        id: result.id.clone(),
        dataset_handle: result.dataset_handle.clone(),
        metrics: result.metrics.clone(),
    };
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

pub async fn get_backtest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, WebError> {
    let result = state.backtests.get(&id)?;
    Ok(Json(result.as_ref()).into_response())
}

pub async fn attribution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, WebError> {
    let guard = CancelOnDrop::new();
    let report = state.backtests.attribution(&id, &guard.0).await?;
    Ok(Json(report).into_response())
}
