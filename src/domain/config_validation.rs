//! Application configuration: read every section through [`ConfigPort`],
//! apply defaults and validate before anything starts.

use crate::domain::backtest::{BacktestConfig, DEFAULT_INITIAL_CAPITAL, DEFAULT_TRANSACTION_COST_BPS};
use crate::domain::dataset_builder::{
    BuilderSettings, DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONCURRENCY, DEFAULT_TTL_HOURS,
};
use crate::domain::error::VantageError;
use crate::domain::screening::DEFAULT_MIN_COVERAGE;
use crate::domain::service::DEFAULT_MAX_STORED_RUNS;
use crate::ports::config_port::ConfigPort;
use std::time::Duration;

pub const DEFAULT_DATABASE_PATH: &str = "vantage.db";
pub const DEFAULT_POOL_SIZE: u32 = 4;
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_DELAY_MS: u64 = 200;
pub const DEFAULT_LOG_FILTER: &str = "vantage=info,tower_http=info";

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSettings {
    pub path: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub bind: String,
    pub min_coverage: f64,
    pub dataset: BuilderSettings,
    pub backtest: BacktestConfig,
    pub max_stored_runs: usize,
    pub retry: RetrySettings,
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseSettings {
                path: DEFAULT_DATABASE_PATH.to_string(),
                pool_size: DEFAULT_POOL_SIZE,
            },
            bind: DEFAULT_BIND.to_string(),
            min_coverage: DEFAULT_MIN_COVERAGE,
            dataset: BuilderSettings::default(),
            backtest: BacktestConfig::default(),
            max_stored_runs: DEFAULT_MAX_STORED_RUNS,
            retry: RetrySettings::default(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> VantageError {
    VantageError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn positive_int(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<i64, VantageError> {
    let value = config.get_int(section, key, default);
    if value <= 0 {
        return Err(invalid(section, key, format!("{key} must be positive")));
    }
    Ok(value)
}

fn non_empty(config: &dyn ConfigPort, section: &str, key: &str, default: &str) -> Result<String, VantageError> {
    match config.get_string(section, key) {
        None => Ok(default.to_string()),
        Some(s) if s.trim().is_empty() => Err(invalid(section, key, format!("{key} must not be empty"))),
        Some(s) => Ok(s.trim().to_string()),
    }
}

pub fn load_app_config(config: &dyn ConfigPort) -> Result<AppConfig, VantageError> {
    let database = DatabaseSettings {
        path: non_empty(config, "database", "path", DEFAULT_DATABASE_PATH)?,
        pool_size: positive_int(config, "database", "pool_size", DEFAULT_POOL_SIZE as i64)? as u32,
    };

    let bind = non_empty(config, "server", "bind", DEFAULT_BIND)?;
    if bind.parse::<std::net::SocketAddr>().is_err() {
        return Err(invalid("server", "bind", format!("not a socket address: {bind}")));
    }

    let min_coverage = config.get_double("screening", "min_coverage", DEFAULT_MIN_COVERAGE);
    if !(min_coverage > 0.0 && min_coverage <= 1.0) {
        return Err(invalid(
            "screening",
            "min_coverage",
            "min_coverage must be in (0, 1]",
        ));
    }

    let dataset = BuilderSettings {
        max_concurrency: positive_int(config, "dataset", "max_concurrency", DEFAULT_MAX_CONCURRENCY as i64)?
            as usize,
        batch_size: positive_int(config, "dataset", "batch_size", DEFAULT_BATCH_SIZE as i64)? as usize,
        ttl: chrono::Duration::hours(positive_int(config, "dataset", "ttl_hours", DEFAULT_TTL_HOURS)?),
        ..BuilderSettings::default()
    };

    let backtest = BacktestConfig {
        initial_capital: config.get_double("backtest", "initial_capital", DEFAULT_INITIAL_CAPITAL),
        transaction_cost_bps: config.get_double(
            "backtest",
            "transaction_cost_bps",
            DEFAULT_TRANSACTION_COST_BPS,
        ),
        risk_free_rate: config.get_double("backtest", "risk_free_rate", 0.0),
    };
    validate_backtest_section(&backtest)?;
    let max_stored_runs =
        positive_int(config, "backtest", "max_stored_runs", DEFAULT_MAX_STORED_RUNS as i64)? as usize;

    let max_retries = config.get_int("gateway", "max_retries", DEFAULT_MAX_RETRIES as i64);
    if max_retries < 0 {
        return Err(invalid("gateway", "max_retries", "max_retries must be non-negative"));
    }
    let base_delay_ms = config.get_int("gateway", "base_delay_ms", DEFAULT_BASE_DELAY_MS as i64);
    if base_delay_ms < 0 {
        return Err(invalid("gateway", "base_delay_ms", "base_delay_ms must be non-negative"));
    }
    let retry = RetrySettings {
        max_retries: max_retries as u32,
        base_delay: Duration::from_millis(base_delay_ms as u64),
    };

    let log_filter = non_empty(config, "logging", "filter", DEFAULT_LOG_FILTER)?;

    Ok(AppConfig {
        database,
        bind,
        min_coverage,
        dataset,
        backtest,
        max_stored_runs,
        retry,
        log_filter,
    })
}

fn validate_backtest_section(backtest: &BacktestConfig) -> Result<(), VantageError> {
    if backtest.initial_capital <= 0.0 {
        return Err(invalid(
            "backtest",
            "initial_capital",
            "initial_capital must be positive",
        ));
    }
    if backtest.transaction_cost_bps < 0.0 {
        return Err(invalid(
            "backtest",
            "transaction_cost_bps",
            "transaction_cost_bps must be non-negative",
        ));
    }
    if backtest.risk_free_rate < 0.0 || backtest.risk_free_rate >= 1.0 {
        return Err(invalid(
            "backtest",
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }
    Ok(())
}
