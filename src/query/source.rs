//! Data Source contract
//!
//! The historian that stores raw samples is external. The engine asks it for
//! every series key an expression needs in one call and reads back an async
//! stream; samples may arrive in any order across keys. Fetching is the only
//! await point of query evaluation and observes the caller's cancellation
//! token.

use crate::query::error::{QueryError, QueryResult};
use crate::types::{SeriesKey, SeriesSample, TimeRange};
use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Stream of raw samples returned by a data source
pub type SampleStream = Pin<Box<dyn Stream<Item = QueryResult<SeriesSample>> + Send>>;

/// Hints passed along with a fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    /// Desired resolution; `None` requests full resolution
    pub interval: Option<Duration>,
    /// Keep minimum/maximum samples when the source reduces resolution
    pub include_peaks: bool,
}

/// Supplier of raw samples
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Identifier used in logs
    fn source_id(&self) -> &str;

    /// Fetch samples for `keys` inside `range`
    ///
    /// Implementations should stop producing once `cancel` fires.
    async fn fetch_samples(
        &self,
        keys: &[SeriesKey],
        range: &TimeRange,
        options: &FetchOptions,
        cancel: CancellationToken,
    ) -> QueryResult<SampleStream>;
}

/// Data source over samples held in memory
///
/// Samples are returned interleaved across keys, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataSource {
    samples: Vec<SeriesSample>,
    by_key: HashMap<SeriesKey, Vec<usize>>,
}

impl InMemoryDataSource {
    /// Empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one sample
    pub fn push(&mut self, sample: SeriesSample) {
        self.by_key
            .entry(sample.key.clone())
            .or_default()
            .push(self.samples.len());
        self.samples.push(sample);
    }

    /// Add `(value, time)` pairs for one key
    pub fn with_series(mut self, key: &str, points: &[(f64, f64)]) -> Self {
        for &(value, time) in points {
            self.push(SeriesSample::new(key, value, time));
        }
        self
    }

    /// Total samples held
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no samples are held
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl FromIterator<SeriesSample> for InMemoryDataSource {
    fn from_iter<I: IntoIterator<Item = SeriesSample>>(iter: I) -> Self {
        let mut source = Self::new();
        for sample in iter {
            source.push(sample);
        }
        source
    }
}

#[async_trait]
impl DataSource for InMemoryDataSource {
    fn source_id(&self) -> &str {
        "memory"
    }

    async fn fetch_samples(
        &self,
        keys: &[SeriesKey],
        range: &TimeRange,
        _options: &FetchOptions,
        cancel: CancellationToken,
    ) -> QueryResult<SampleStream> {
        if cancel.is_cancelled() {
            return Err(QueryError::cancelled());
        }

        let mut indexes: Vec<usize> = keys
            .iter()
            .filter_map(|key| self.by_key.get(key))
            .flatten()
            .copied()
            .collect();
        indexes.sort_unstable();
        indexes.dedup();

        let matching: Vec<QueryResult<SeriesSample>> = indexes
            .into_iter()
            .map(|i| &self.samples[i])
            .filter(|s| range.contains(s.time))
            .cloned()
            .map(Ok)
            .collect();

        let stream = stream::iter(matching).take_until(cancel.cancelled_owned());
        Ok(Box::pin(stream))
    }
}
