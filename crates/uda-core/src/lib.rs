//! Core types and utilities for imbalanced domain adaptation in
//! rotating-machinery fault diagnosis.
//!
//! This crate provides the configuration, error, metric and device types
//! shared by the dataset and training crates.

pub mod backend;
pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use backend::*;
pub use cli::*;
pub use config::*;
pub use error::{DivergedQuantity, Error, Result};
pub use metrics::*;
pub use types::*;

/// Glob-importable set of the crate's public items
pub mod prelude {
    pub use crate::backend::*;
    pub use crate::config::*;
    pub use crate::error::{Error, Result};
    pub use crate::metrics::*;
    pub use crate::types::*;
}
