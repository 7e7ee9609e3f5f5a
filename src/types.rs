//! Core data types shared by the parser, resolver and evaluation engine
//!
//! # Key Types
//!
//! - **`SeriesKey`**: Opaque identifier of one queryable series (e.g. `PPA:1`)
//! - **`SeriesSample`**: One time-stamped value with quality flags
//! - **`SampleSeq`**: A replayable, lazily evaluated sequence of samples
//! - **`SeriesGroup`**: One named output series flowing through the function chain
//! - **`TimeRange`**: Query window in Unix-epoch milliseconds
//! - **`GroupOperation`**: How a function is applied across input groups
//!
//! # Example
//!
//! ```rust
//! use kuba_expr::types::{SampleSeq, SeriesGroup, SeriesSample};
//!
//! let samples = vec![
//!     SeriesSample::new("PPA:1", 10.0, 1000.0),
//!     SeriesSample::new("PPA:1", 20.0, 2000.0),
//! ];
//! let group = SeriesGroup::new("PPA:1", "PPA:1", SampleSeq::from_vec(samples));
//! assert_eq!(group.samples.iter().count(), 2);
//! ```

use crate::query::error::{QueryError, QueryResult};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Series Key
// ============================================================================

/// Internal identifier for one queryable time series
///
/// Cheap to clone; the text is shared behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeriesKey(Arc<str>);

impl SeriesKey {
    /// Create a key from any string-like value
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// Borrow the key text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against arbitrary text
    pub fn matches(&self, text: &str) -> bool {
        self.0.eq_ignore_ascii_case(text.trim())
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SeriesKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SeriesKey {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

// ============================================================================
// Quality Flags
// ============================================================================

/// Sample quality bit flags
///
/// Zero means "normal". The core only filters on these, it never sets them.
pub mod flags {
    /// Normal quality, no flags set
    pub const NORMAL: u32 = 0;
    /// Value is outside its reasonability range
    pub const BAD_DATA: u32 = 1 << 0;
    /// Timestamp is suspect
    pub const BAD_TIME: u32 = 1 << 1;
    /// Value was produced by a calculation
    pub const CALCULATED_VALUE: u32 = 1 << 2;
    /// Sample was discarded by upstream processing
    pub const DISCARDED_VALUE: u32 = 1 << 3;
}

// ============================================================================
// Series Sample
// ============================================================================

/// A single time-stamped value of one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSample {
    /// Series this sample belongs to
    pub key: SeriesKey,
    /// Sample value
    pub value: f64,
    /// Unix-epoch milliseconds
    pub time: f64,
    /// Quality flags, see [`flags`]
    #[serde(default)]
    pub flags: u32,
}

impl SeriesSample {
    /// Create a sample with normal quality
    pub fn new(key: impl Into<SeriesKey>, value: f64, time: f64) -> Self {
        Self {
            key: key.into(),
            value,
            time,
            flags: flags::NORMAL,
        }
    }

    /// Set quality flags
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Copy of this sample carrying a different value
    pub fn with_value(&self, value: f64) -> Self {
        Self {
            value,
            ..self.clone()
        }
    }

    /// Copy of this sample carrying a different time
    pub fn with_time(&self, time: f64) -> Self {
        Self {
            time,
            ..self.clone()
        }
    }
}

// ============================================================================
// Sample Sequence
// ============================================================================

/// Boxed sample iterator handed out by [`SampleSeq::iter`]
pub type SampleIter = Box<dyn Iterator<Item = SeriesSample> + Send>;

/// Replayable lazy sequence of samples
///
/// Each call to [`SampleSeq::iter`] starts a fresh pass. Deferred functions
/// wrap the source factory so no work happens until the sequence is read;
/// immediate functions materialize their result into a shared slice.
#[derive(Clone)]
pub struct SampleSeq(Arc<dyn Fn() -> SampleIter + Send + Sync>);

impl SampleSeq {
    /// Build a sequence from an iterator factory
    pub fn from_fn<F>(factory: F) -> Self
    where
        F: Fn() -> SampleIter + Send + Sync + 'static,
    {
        Self(Arc::new(factory))
    }

    /// Materialized sequence over owned samples
    pub fn from_vec(samples: Vec<SeriesSample>) -> Self {
        let shared: Arc<[SeriesSample]> = samples.into();
        Self::from_shared(shared)
    }

    /// Materialized sequence over an already shared slice
    pub fn from_shared(shared: Arc<[SeriesSample]>) -> Self {
        Self::from_fn(move || {
            let data = Arc::clone(&shared);
            Box::new((0..data.len()).map(move |i| data[i].clone()))
        })
    }

    /// Sequence that yields nothing
    pub fn empty() -> Self {
        Self::from_fn(|| Box::new(std::iter::empty()))
    }

    /// Start a new pass over the sequence
    pub fn iter(&self) -> SampleIter {
        (self.0)()
    }

    /// Materialize the whole sequence
    pub fn to_vec(&self) -> Vec<SeriesSample> {
        self.iter().collect()
    }

    /// Chain several sequences into one, in order
    pub fn concat(parts: Vec<SampleSeq>) -> Self {
        let parts: Arc<[SampleSeq]> = parts.into();
        Self::from_fn(move || {
            let parts = Arc::clone(&parts);
            Box::new((0..parts.len()).flat_map(move |i| parts[i].iter()))
        })
    }

    /// Lazily map every sample
    pub fn map<F>(self, f: F) -> Self
    where
        F: Fn(SeriesSample) -> SeriesSample + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::from_fn(move || {
            let f = Arc::clone(&f);
            Box::new(self.iter().map(move |s| f(s)))
        })
    }

    /// Lazily keep samples matching a predicate
    pub fn filter<F>(self, f: F) -> Self
    where
        F: Fn(&SeriesSample) -> bool + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::from_fn(move || {
            let f = Arc::clone(&f);
            Box::new(self.iter().filter(move |s| f(s)))
        })
    }
}

impl fmt::Debug for SampleSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SampleSeq(..)")
    }
}

// ============================================================================
// Series Group
// ============================================================================

/// One named series flowing through the function chain
///
/// Groups are never mutated in place once handed on; renaming or
/// transforming produces a new group.
#[derive(Debug, Clone)]
pub struct SeriesGroup {
    /// Name shown for this series
    pub display_name: String,
    /// Target expression stripped of function wrapping, used for metadata lookups
    pub root_name: String,
    /// Lazily evaluated samples
    pub samples: SampleSeq,
    /// Remove from output when it has no samples
    pub drop_if_empty: bool,
    /// Caller-assigned request identifier
    pub ref_id: String,
    /// Metadata fields attached to the output
    pub metadata: BTreeMap<String, String>,
}

impl SeriesGroup {
    /// Create a group with no ref id and empty metadata
    pub fn new(
        display_name: impl Into<String>,
        root_name: impl Into<String>,
        samples: SampleSeq,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            root_name: root_name.into(),
            samples,
            drop_if_empty: false,
            ref_id: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// New group with the same identity but different samples and name
    pub fn derive(&self, display_name: impl Into<String>, samples: SampleSeq) -> Self {
        Self {
            display_name: display_name.into(),
            samples,
            ..self.clone()
        }
    }
}

// ============================================================================
// Group Operation
// ============================================================================

/// How a function is applied across its input groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GroupOperation {
    /// Apply to each input group independently
    #[default]
    None,
    /// Flatten all input groups and apply once
    Set,
    /// Align inputs by time and apply per time slice
    Slice,
}

impl GroupOperation {
    /// Prefix used in function names and display names
    pub fn prefix(&self) -> &'static str {
        match self {
            GroupOperation::None => "",
            GroupOperation::Set => "Set",
            GroupOperation::Slice => "Slice",
        }
    }
}

// ============================================================================
// Time Range
// ============================================================================

/// Query window in Unix-epoch milliseconds (inclusive on both ends)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp in milliseconds
    pub start: f64,
    /// End timestamp in milliseconds
    pub end: f64,
}

impl TimeRange {
    /// Create a new time range, rejecting `start > end`
    pub fn new(start: f64, end: f64) -> QueryResult<Self> {
        if start > end {
            return Err(QueryError::out_of_range(format!(
                "Invalid time range: start {} > end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Parse request bounds given as RFC 3339 text or millisecond numbers
    pub fn parse(from: &str, to: &str) -> QueryResult<Self> {
        Self::new(parse_timestamp(from)?, parse_timestamp(to)?)
    }

    /// Check whether a timestamp falls inside the range
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time <= self.end
    }

    /// Span in milliseconds
    pub fn duration_ms(&self) -> f64 {
        self.end - self.start
    }
}

fn parse_timestamp(text: &str) -> QueryResult<f64> {
    let text = text.trim();
    if let Ok(ms) = text.parse::<f64>() {
        return Ok(ms);
    }
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.timestamp_millis() as f64)
        .map_err(|e| QueryError::format(format!("Invalid timestamp '{}'", text)).with_source(e))
}
