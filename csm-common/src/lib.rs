//! CSM Common - configuration, errors, and logging shared by the CSM services.
//!
//! This crate provides:
//! - Environment-driven configuration
//! - Error types and context helpers
//! - Logging setup with noise filtering

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;

pub use config::{Config, InferenceConfig, ObservabilityConfig, ServerConfig, StorageConfig};
pub use error::{Error, Result};
