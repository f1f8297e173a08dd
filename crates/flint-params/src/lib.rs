//! Flint wallet parameters and configuration
//!
//! This crate provides the fixed constants of the key-management core
//! (word counts, PIN bounds, nickname limits) and the typed, serde-loadable
//! configuration consumed by the vault, registry, session and sync layers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod constants;

pub use config::{
    CipherSuite, FlintConfig, KdfParams, LoggingConfig, RegistryConfig, SessionConfig,
    SyncConfig, VaultConfig,
};
pub use constants::*;

/// Error types for configuration operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration document could not be parsed
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// A configuration value is out of range
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// Dotted path of the offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, Error>;
