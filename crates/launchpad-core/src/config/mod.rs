//! Configuration module for Launchpad Core.

pub mod cli_config;

pub use cli_config::{CliConfig, CliConfigError, CliConfigResult};
