//! Core domain types and logic.

pub mod ohlcv;
pub mod fundamentals;
pub mod criteria;
pub mod universe;
pub mod snapshot;
pub mod calendar;
pub mod cancel;
pub mod indicator;
pub mod signal;
pub mod screening;
pub mod dataset;
pub mod dataset_builder;
pub mod portfolio;
pub mod strategy;
pub mod backtest;
pub mod metrics;
pub mod attribution;
pub mod service;
pub mod config_validation;
pub mod error;
