//! Error types for the crate-level surfaces (configuration, CLI, IO)
//!
//! Query evaluation itself reports [`QueryError`]; this enum wraps it for
//! callers that also load configuration or datasets.

use crate::query::error::QueryError;
use thiserror::Error;

/// Main error type
#[derive(Error, Debug)]
pub enum Error {
    /// Query parsing or evaluation failed
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse error
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// General error
    #[error("{0}")]
    General(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
