//! Caching layer for parsed expressions and resolved targets
//!
//! A single [`TargetCaches`] instance is built at startup and shared by every
//! request through the engine, so repeated sub-expressions are parsed and
//! resolved once per idle window.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    TargetCaches                      │
//! │  expressions: text            -> ParsedExpression    │
//! │  targets:     (table, text)   -> TargetMap           │
//! │  labels:      template@root   -> rendered label      │
//! └──────────────────────────────────────────────────────┘
//! ```

mod target;

pub use target::{CacheStats, TargetCache};

use crate::config::CacheConfig;
use crate::query::parser::ParsedExpression;
use crate::query::resolver::TargetMap;
use std::sync::Arc;
use std::time::Duration;

/// Shared caches used across parallel target evaluations
pub struct TargetCaches {
    /// Parsed function lists keyed by expression text
    pub expressions: TargetCache<String, Arc<ParsedExpression>>,
    /// Resolved series keys keyed by metadata table and expression text
    pub targets: TargetCache<(String, String), Arc<TargetMap>>,
    /// Rendered labels keyed by `template@root`
    pub labels: TargetCache<String, String>,
}

impl TargetCaches {
    /// Create caches with a common sliding expiration
    pub fn new(expiration: Duration) -> Self {
        Self {
            expressions: TargetCache::new(expiration),
            targets: TargetCache::new(expiration),
            labels: TargetCache::new(expiration),
        }
    }

    /// Create caches from configuration
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.expiration())
    }

    /// Sweep every cache, returning the total number of evicted entries
    pub fn cleanup_expired(&self) -> usize {
        self.expressions.cleanup_expired()
            + self.targets.cleanup_expired()
            + self.labels.cleanup_expired()
    }

    /// Drop all cached entries
    pub fn clear(&self) {
        self.expressions.clear();
        self.targets.clear();
        self.labels.clear();
    }
}

impl Default for TargetCaches {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}
