//! HTTP API adapter: JSON endpoints over the snapshot, dataset and backtest
//! services.

mod error;
mod handlers;

pub use error::{WebError, status_from_error};
pub use handlers::*;

use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::domain::dataset_builder::DatasetBuilder;
use crate::domain::screening::SnapshotService;
use crate::domain::service::BacktestService;
use crate::ports::snapshot_port::UniverseRepository;

pub struct AppState {
    pub universes: Arc<dyn UniverseRepository>,
    pub snapshots: Arc<SnapshotService>,
    pub datasets: Arc<DatasetBuilder>,
    pub backtests: Arc<BacktestService>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/universes",
            get(handlers::list_universes).post(handlers::create_universe),
        )
        .route("/universes/{id}", get(handlers::get_universe))
        .route("/universes/{id}/criteria", put(handlers::update_criteria))
        .route("/universes/{id}/snapshots", post(handlers::create_snapshot))
        .route("/universes/{id}/timeline", get(handlers::timeline))
        .route("/universes/{id}/composition/{date}", get(handlers::composition))
        .route("/universes/{id}/backfill", post(handlers::backfill))
        .route("/datasets/complete", post(handlers::complete_dataset))
        .route("/backtests", post(handlers::run_backtest))
        .route("/backtests/{id}", get(handlers::get_backtest))
        .route("/backtests/{id}/attribution", get(handlers::attribution))
        .fallback(handlers::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}
