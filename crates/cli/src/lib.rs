//! Command-line front end for the tile balancer.

pub mod config;
pub mod telemetry;

pub use config::CliConfig;
