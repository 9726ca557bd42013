//! Complete dataset construction and revision-keyed caching.

mod common;

use common::*;
use std::sync::Arc;
use vantage::adapters::sqlite_adapter::SqliteAdapter;
use vantage::cli::Services;
use vantage::domain::cancel::CancelFlag;
use vantage::domain::config_validation::AppConfig;
use vantage::domain::dataset_builder::{DatasetRequest, default_indicators};
use vantage::domain::error::VantageError;
use vantage::domain::indicator::IndicatorType;
use vantage::ports::market_data_port::MarketDataPort;

fn seeded(gateway: MockGateway) -> (Services, Arc<MockGateway>) {
    let gateway = Arc::new(gateway);
    let services = services(Arc::clone(&gateway));
    create_universe(&services, "asx");
    for date in ["2023-01-01", "2023-03-01"] {
        services
            .snapshots
            .create_snapshot("asx", d(date), None, now())
            .unwrap();
    }
    (services, gateway)
}

fn request() -> DatasetRequest {
    DatasetRequest::new("asx", d("2023-01-01"), d("2023-06-30"), default_indicators())
}

#[tokio::test]
async fn covers_superset_of_all_members() {
    let (services, _) = seeded(rotating_gateway());
    let (dataset, cached) = services
        .datasets
        .resolve_or_build(&request(), now(), &CancelFlag::new())
        .await
        .unwrap();

    assert!(!cached);
    let superset: Vec<String> = dataset.superset.iter().cloned().collect();
    assert_eq!(superset, symbols(&["A", "B", "C", "D"]));
    assert!(dataset.missing.is_empty());
    let series = dataset.series("A").unwrap();
    assert!(series.bars.first().unwrap().date < d("2023-01-01"));
    assert_eq!(series.indicators.len(), 3);
}

#[tokio::test]
async fn failed_symbols_are_reported_not_fatal() {
    let (services, _) = seeded(rotating_gateway().with_failing("C"));
    let (dataset, _) = services
        .datasets
        .resolve_or_build(&request(), now(), &CancelFlag::new())
        .await
        .unwrap();

    assert!(dataset.series("C").is_none());
    assert!(dataset.missing.contains_key("C"));
    assert_eq!(dataset.series.len(), 3);
    assert!(dataset.summary(false).missing.contains_key("C"));
}

#[tokio::test]
async fn nothing_fetched_is_partial_failure() {
    let gateway = rotating_gateway()
        .with_failing("A")
        .with_failing("B")
        .with_failing("C")
        .with_failing("D");
    let (services, _) = seeded(gateway);
    match services
        .datasets
        .resolve_or_build(&request(), now(), &CancelFlag::new())
        .await
    {
        Err(VantageError::PartialFetchFailure { requested, missing }) => {
            assert_eq!(requested, 4);
            assert_eq!(missing.len(), 4);
        }
        other => panic!("expected PartialFetchFailure, got {other:?}"),
    }
}

#[tokio::test]
async fn second_request_is_served_from_cache() {
    let (services, gateway) = seeded(rotating_gateway());
    let cancel = CancelFlag::new();
    let (first, _) = services
        .datasets
        .resolve_or_build(&request(), now(), &cancel)
        .await
        .unwrap();
    let calls = gateway.history_calls();

    let (second, cached) = services
        .datasets
        .resolve_or_build(&request(), now(), &cancel)
        .await
        .unwrap();
    assert!(cached);
    assert_eq!(first.handle, second.handle);
    assert_eq!(gateway.history_calls(), calls);
}

#[tokio::test]
async fn new_snapshot_invalidates_cached_dataset() {
    let (services, _) = seeded(rotating_gateway());
    let cancel = CancelFlag::new();
    let (old, _) = services
        .datasets
        .resolve_or_build(&request(), now(), &cancel)
        .await
        .unwrap();

    services
        .snapshots
        .create_snapshot("asx", d("2023-05-01"), None, now())
        .unwrap();

    assert!(matches!(
        services.datasets.ensure_fresh(&old).await,
        Err(VantageError::DatasetStale { .. })
    ));
    assert!(matches!(
        services.datasets.get(&old.handle),
        Err(VantageError::DatasetNotFound(_))
    ));

    let (fresh, cached) = services
        .datasets
        .resolve_or_build(&request(), now(), &cancel)
        .await
        .unwrap();
    assert!(!cached);
    assert_ne!(fresh.handle, old.handle);
    assert_ne!(fresh.key.snapshot_revision, old.key.snapshot_revision);
}

#[tokio::test]
async fn snapshot_after_range_keeps_cache_valid() {
    let (services, _) = seeded(rotating_gateway());
    let cancel = CancelFlag::new();
    let (old, _) = services
        .datasets
        .resolve_or_build(&request(), now(), &cancel)
        .await
        .unwrap();

    services
        .snapshots
        .create_snapshot("asx", d("2023-09-01"), None, now())
        .unwrap();

    services.datasets.ensure_fresh(&old).await.unwrap();
    let (again, cached) = services
        .datasets
        .resolve_or_build(&request(), now(), &cancel)
        .await
        .unwrap();
    assert!(cached);
    assert_eq!(again.handle, old.handle);
}

#[tokio::test]
async fn rebuilds_are_content_identical() {
    let (services, _) = seeded(rotating_gateway().with_failing("B"));
    let cancel = CancelFlag::new();
    let first = services.datasets.build(&request(), now(), &cancel).await.unwrap();
    let second = services.datasets.build(&request(), now(), &cancel).await.unwrap();

    assert_eq!(first.handle, second.handle);
    assert_eq!(first.content_hash, second.content_hash);
    assert_eq!(first.series, second.series);
}

#[tokio::test]
async fn batching_does_not_change_content() {
    let (services, _) = seeded(rotating_gateway());
    let cancel = CancelFlag::new();
    let whole = services.datasets.build(&request(), now(), &cancel).await.unwrap();

    let mut config = AppConfig::default();
    config.dataset.batch_size = 1;
    config.dataset.max_concurrency = 2;
    let gateway = Arc::new(rotating_gateway());
    let store = Arc::new(SqliteAdapter::in_memory().unwrap());
    store.initialize_schema().unwrap();
    let provider: Arc<dyn MarketDataPort> = gateway.clone();
    let batched = Services::wire(store, provider, &config);
    create_universe(&batched, "asx");
    for date in ["2023-01-01", "2023-03-01"] {
        batched
            .snapshots
            .create_snapshot("asx", d(date), None, now())
            .unwrap();
    }
    let split = batched.datasets.build(&request(), now(), &cancel).await.unwrap();

    assert_eq!(gateway.history_calls(), 4);
    assert_eq!(split.content_hash, whole.content_hash);
}

#[tokio::test]
async fn universe_without_snapshots_has_no_dataset() {
    let services = services(Arc::new(rotating_gateway()));
    create_universe(&services, "empty");
    let request = DatasetRequest::new(
        "empty",
        d("2023-01-01"),
        d("2023-06-30"),
        vec![IndicatorType::rsi_default()],
    );
    assert!(matches!(
        services
            .datasets
            .resolve_or_build(&request, now(), &CancelFlag::new())
            .await,
        Err(VantageError::NoSnapshotAvailable { .. })
    ));
}

#[tokio::test]
async fn cancelled_build_publishes_nothing() {
    let (services, _) = seeded(rotating_gateway());
    let cancel = CancelFlag::new();
    cancel.cancel();
    assert!(services.datasets.build(&request(), now(), &cancel).await.is_err());
    assert!(services.datasets.cache().is_empty());
}

#[tokio::test]
async fn cancel_between_batches_stops_remaining_fetches() {
    let cancel = CancelFlag::new();
    let gateway = Arc::new(rotating_gateway().cancelling(cancel.clone()));
    let mut config = AppConfig::default();
    config.dataset.batch_size = 1;
    config.dataset.max_concurrency = 1;
    let services = services_with(Arc::clone(&gateway), &config);
    create_universe(&services, "asx");
    for date in ["2023-01-01", "2023-03-01"] {
        services
            .snapshots
            .create_snapshot("asx", d(date), None, now())
            .unwrap();
    }

    let result = services.datasets.resolve_or_build(&request(), now(), &cancel).await;
    assert!(matches!(result, Err(VantageError::Cancelled)));
    assert_eq!(gateway.history_calls(), 1);
    assert!(services.datasets.cache().is_empty());
}

#[tokio::test]
async fn expired_entries_of_other_scopes_are_purged() {
    let (services, _) = seeded(rotating_gateway());
    let cancel = CancelFlag::new();
    let (old, _) = services
        .datasets
        .resolve_or_build(&request(), now(), &cancel)
        .await
        .unwrap();

    let later = now() + services.datasets.settings().ttl + chrono::Duration::hours(1);
    let other = DatasetRequest::new("asx", d("2023-02-01"), d("2023-06-30"), default_indicators());
    services
        .datasets
        .resolve_or_build(&other, later, &cancel)
        .await
        .unwrap();

    assert_eq!(services.datasets.cache().len(), 1);
    assert!(matches!(
        services.datasets.get(&old.handle),
        Err(VantageError::DatasetNotFound(_))
    ));
}
