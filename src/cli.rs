//! CLI definition and dispatch.

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::retry_gateway::RetryingGateway;
use crate::adapters::sqlite_adapter::SqliteAdapter;
use crate::domain::backtest::{BacktestSpec, UniverseMode};
use crate::domain::calendar::Frequency;
use crate::domain::cancel::CancelFlag;
use crate::domain::config_validation::{AppConfig, load_app_config};
use crate::domain::criteria::ScreeningCriteria;
use crate::domain::dataset_builder::{DatasetBuilder, DatasetCache};
use crate::domain::error::VantageError;
use crate::domain::screening::SnapshotService;
use crate::domain::service::{BacktestRequest, BacktestService};
use crate::domain::signal::CompositeConfig;
use crate::domain::strategy::{DEFAULT_MAX_POSITIONS, Strategy};
use crate::domain::universe::Universe;
use crate::ports::market_data_port::MarketDataPort;
use crate::ports::snapshot_port::{SnapshotStore, UniverseRepository};

#[derive(Parser, Debug)]
#[command(name = "vantage", about = "Temporal universe backtester")]
pub struct Cli {
    /// INI configuration file; built-in defaults apply when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    EqualWeight,
    SnapshotWeighted,
    CompositeSignal,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP API
    Serve,
    /// Define a universe
    CreateUniverse {
        id: String,
        #[arg(long)]
        owner: String,
        /// JSON file with screening criteria
        #[arg(long)]
        criteria: Option<PathBuf>,
    },
    /// Screen a universe and append a snapshot
    Snapshot {
        universe: String,
        #[arg(long)]
        date: NaiveDate,
    },
    /// Generate historical snapshots with the current criteria
    Backfill {
        universe: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long, default_value = "monthly")]
        frequency: Frequency,
    },
    /// Print the snapshots affecting a date range
    Timeline {
        universe: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
    /// Import bars, fundamentals and listings from a CSV directory
    ImportCsv { dir: PathBuf },
    /// Run a backtest
    Backtest {
        universe: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long, default_value = "monthly")]
        frequency: Frequency,
        #[arg(long, value_enum, default_value = "equal-weight")]
        strategy: StrategyArg,
        #[arg(long, default_value_t = DEFAULT_MAX_POSITIONS)]
        max_positions: usize,
        /// Use end-of-period membership for the whole run
        #[arg(long)]
        static_universe: bool,
        /// Also compute return attribution
        #[arg(long)]
        attribution: bool,
        /// Write the full result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let config = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };
    init_tracing(&config.log_filter);

    let result = match cli.command {
        Command::Serve => run_serve(&config),
        Command::CreateUniverse {
            id,
            owner,
            criteria,
        } => run_create_universe(&config, id, owner, criteria.as_deref()),
        Command::Snapshot { universe, date } => run_snapshot(&config, &universe, date),
        Command::Backfill {
            universe,
            start,
            end,
            frequency,
        } => run_backfill(&config, &universe, start, end, frequency),
        Command::Timeline {
            universe,
            start,
            end,
        } => run_timeline(&config, &universe, start, end),
        Command::ImportCsv { dir } => run_import_csv(&config, dir),
        Command::Backtest {
            universe,
            start,
            end,
            frequency,
            strategy,
            max_positions,
            static_universe,
            attribution,
            output,
        } => {
            let strategy = match strategy {
                StrategyArg::EqualWeight => Strategy::EqualWeight,
                StrategyArg::SnapshotWeighted => Strategy::SnapshotWeighted,
                StrategyArg::CompositeSignal => Strategy::CompositeSignal {
                    max_positions,
                    composite: CompositeConfig::default(),
                },
            };
            let spec = BacktestSpec {
                universe_id: universe,
                start,
                end,
                frequency,
                strategy,
                mode: if static_universe {
                    UniverseMode::Static
                } else {
                    UniverseMode::Temporal
                },
            };
            run_backtest(&config, spec, attribution, output.as_deref())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: Option<&Path>) -> Result<AppConfig, VantageError> {
    match path {
        Some(path) => load_app_config(&FileConfigAdapter::from_file(path)?),
        None => Ok(AppConfig::default()),
    }
}

/// `RUST_LOG` takes precedence over the configured filter.
pub fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_json<T: Serialize>(value: &T) -> Result<(), VantageError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn runtime() -> Result<tokio::runtime::Runtime, VantageError> {
    Ok(tokio::runtime::Runtime::new()?)
}

/// Wired services over one SQLite store.
pub struct Services {
    pub store: Arc<SqliteAdapter>,
    pub snapshots: Arc<SnapshotService>,
    pub datasets: Arc<DatasetBuilder>,
    pub backtests: Arc<BacktestService>,
}

impl Services {
    pub fn open(config: &AppConfig) -> Result<Self, VantageError> {
        let store = Arc::new(SqliteAdapter::from_settings(&config.database)?);
        store.initialize_schema()?;
        let gateway: Arc<dyn MarketDataPort> = Arc::new(RetryingGateway::new(
            store.clone(),
            config.retry.clone(),
        ));
        Ok(Self::wire(store, gateway, config))
    }

    /// Services over `store` for universes and snapshots, with market data
    /// from `gateway`.
    pub fn wire(
        store: Arc<SqliteAdapter>,
        gateway: Arc<dyn MarketDataPort>,
        config: &AppConfig,
    ) -> Self {
        let snapshot_store: Arc<dyn SnapshotStore> = store.clone();
        let universes: Arc<dyn UniverseRepository> = store.clone();

        let snapshots = Arc::new(
            SnapshotService::new(universes, Arc::clone(&snapshot_store), Arc::clone(&gateway))
                .with_min_coverage(config.min_coverage),
        );
        let datasets = Arc::new(DatasetBuilder::new(
            gateway,
            Arc::clone(&snapshot_store),
            Arc::new(DatasetCache::new()),
            config.dataset.clone(),
        ));
        let backtests = Arc::new(
            BacktestService::new(Arc::clone(&datasets), snapshot_store, config.backtest.clone())
                .with_max_runs(config.max_stored_runs),
        );
        Self {
            store,
            snapshots,
            datasets,
            backtests,
        }
    }
}

fn run_create_universe(
    config: &AppConfig,
    id: String,
    owner: String,
    criteria_path: Option<&Path>,
) -> Result<(), VantageError> {
    let criteria: ScreeningCriteria = match criteria_path {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)
            .map_err(|e| VantageError::invalid(format!("{}: {e}", path.display())))?,
        None => ScreeningCriteria::default(),
    };
    let universe =
        Universe::new(id, owner, criteria, Utc::now()).map_err(VantageError::invalid)?;
    let services = Services::open(config)?;
    services.store.insert_universe(&universe)?;
    print_json(&universe)
}

fn run_snapshot(config: &AppConfig, universe: &str, date: NaiveDate) -> Result<(), VantageError> {
    let services = Services::open(config)?;
    let snapshot = services
        .snapshots
        .create_snapshot(universe, date, None, Utc::now())?;
    print_json(&snapshot)
}

fn run_backfill(
    config: &AppConfig,
    universe: &str,
    start: NaiveDate,
    end: NaiveDate,
    frequency: Frequency,
) -> Result<(), VantageError> {
    let services = Services::open(config)?;
    let report = services
        .snapshots
        .backfill(universe, start, end, frequency, Utc::now())?;
    print_json(&report)
}

fn run_timeline(
    config: &AppConfig,
    universe: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(), VantageError> {
    let services = Services::open(config)?;
    for snapshot in services.snapshots.timeline(universe, start, end)? {
        let symbols: Vec<&str> = snapshot.members.iter().map(|m| m.symbol.as_str()).collect();
        println!(
            "{}  members={:<4} turnover={:.3}  +{:?} -{:?}  {}",
            snapshot.snapshot_date,
            snapshot.members.len(),
            snapshot.turnover,
            snapshot.added,
            snapshot.removed,
            symbols.join(",")
        );
    }
    Ok(())
}

fn run_import_csv(config: &AppConfig, dir: PathBuf) -> Result<(), VantageError> {
    let services = Services::open(config)?;
    let summary = CsvAdapter::new(dir).import_into(&services.store)?;
    println!(
        "imported {} bars for {} symbols, {} fundamentals rows, {} listings",
        summary.bars, summary.symbols, summary.fundamentals, summary.listings
    );
    Ok(())
}

fn run_backtest(
    config: &AppConfig,
    spec: BacktestSpec,
    attribution: bool,
    output: Option<&Path>,
) -> Result<(), VantageError> {
    let services = Services::open(config)?;
    let cancel = CancelFlag::new();
    let request = BacktestRequest::new(spec);

    runtime()?.block_on(async {
        let result = services
            .backtests
            .run(&request, Utc::now(), &cancel)
            .await?;

        let m = &result.metrics;
        println!("backtest {}", result.id);
        println!("  strategy        {}", result.strategy.name());
        println!("  rebalances      {}", result.rebalances.len());
        println!("  total return    {:.2}%", m.total_return * 100.0);
        println!("  CAGR            {:.2}%", m.cagr * 100.0);
        println!("  sharpe          {:.3}", m.sharpe_ratio);
        println!("  max drawdown    {:.2}%", m.max_drawdown * 100.0);
        println!(
            "  costs           {:.2} ({:.0}% universe-driven)",
            result.costs.total_cost,
            result.costs.universe_share() * 100.0
        );

        if attribution {
            let report = services.backtests.attribution(&result.id, &cancel).await?;
            println!("  universe effect {:.2}%", report.universe_effect * 100.0);
            println!("  selection       {:.2}%", report.selection_effect * 100.0);
            println!("  beta / alpha    {:.3} / {:.2}%", report.beta, report.alpha * 100.0);
            println!("  survivorship    {:.2}%", report.survivorship_bias * 100.0);
        }

        if let Some(path) = output {
            fs::write(path, serde_json::to_string_pretty(result.as_ref())?)?;
            println!("  result written to {}", path.display());
        }
        Ok::<(), VantageError>(())
    })
}

fn run_serve(config: &AppConfig) -> Result<(), VantageError> {
    #[cfg(feature = "web")]
    {
        use crate::adapters::web::{AppState, build_router};
        use std::net::SocketAddr;

        let services = Services::open(config)?;
        let addr: SocketAddr = config
            .bind
            .parse()
            .map_err(|e| VantageError::ConfigInvalid {
                section: "server".into(),
                key: "bind".into(),
                reason: format!("{e}"),
            })?;

        let universes: Arc<dyn UniverseRepository> = services.store.clone();
        let router = build_router(AppState {
            universes,
            snapshots: services.snapshots,
            datasets: services.datasets,
            backtests: services.backtests,
        });

        runtime()?.block_on(async move {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!(%addr, "listening");
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                    tracing::info!("shutdown requested");
                })
                .await?;
            Ok::<(), VantageError>(())
        })
    }

    #[cfg(not(feature = "web"))]
    {
        let _ = config;
        Err(VantageError::invalid("the web feature is required for serve"))
    }
}
