//! Launchpad Core - concrete backends and configuration for the launchers.
//!
//! This crate provides:
//! - `CliConfig` discovery and merging (`~/.launchpad/config.toml`, `./.launchpadrc`)
//! - The deterministic `SyntheticBackend`
//! - Backend lookup by id
//!
//! # Example
//!
//! ```rust,no_run
//! use launchpad_core::backend_for;
//!
//! let backend = backend_for("synthetic", 42).unwrap();
//! assert_eq!(backend.id(), "synthetic");
//! ```

pub mod config;
pub mod error;
pub mod synthetic;

pub use config::{CliConfig, CliConfigError, CliConfigResult};
pub use error::{BackendError, Result};
pub use synthetic::{SYNTHETIC_BACKEND_ID, SyntheticBackend, SyntheticSnapshot};

use launchpad_training::ExecutionBackend;

/// Ids accepted by [`backend_for`].
pub const AVAILABLE_BACKENDS: &[&str] = &[SYNTHETIC_BACKEND_ID];

/// Build the execution backend registered under `id`.
pub fn backend_for(id: &str, seed: u64) -> Result<Box<dyn ExecutionBackend>> {
    match id {
        SYNTHETIC_BACKEND_ID => Ok(Box::new(SyntheticBackend::new(seed))),
        other => Err(BackendError::Unknown(other.to_string())),
    }
}
