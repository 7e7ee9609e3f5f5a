//! Kuba Expr - time-series query expression engine
//!
//! This library evaluates target expressions over historian data:
//! - Target resolution from encoded keys, GUIDs, point tags and FILTER clauses
//! - A closed registry of series functions applied per series, per set or per time slice
//! - Lazy evaluation, so unconsumed function chains never touch their input
//! - Multi-target requests with per-target error isolation and cancellation

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;
pub mod units;

/// Configuration management with TOML support
pub mod config;

/// Sliding-expiration caches for parsed expressions, resolved targets and labels
pub mod cache;

/// Query expression parsing, resolution and evaluation
pub mod query;

// Re-export main types
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use query::{QueryEngine, QueryRequest, TargetResponse};
pub use types::{SampleSeq, SeriesGroup, SeriesKey, SeriesSample, TimeRange};
