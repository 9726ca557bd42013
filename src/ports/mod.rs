//! Port traits the domain depends on.

pub mod config_port;
pub mod market_data_port;
pub mod snapshot_port;
