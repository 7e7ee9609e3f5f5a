//! Query Engine
//!
//! Multi-target entry point. A request carries several target expressions
//! that share one time range and one set of request options; each target is
//! evaluated independently and concurrently, bounded by
//! `query.max_parallel_targets`.
//!
//! ```text
//!   QueryRequest
//!        │
//!        ├─ range / interval / quality      (request wide, fail fast)
//!        │
//!        ├─ target "A" ─┐
//!        ├─ target "B" ─┼─► modifiers ─► QueryOrchestrator ─► decimate ─► TargetResponse*
//!        └─ target "C" ─┘
//! ```
//!
//! A failing target produces a single response carrying `syntaxError` and
//! never affects its siblings. Cancellation is the exception: it aborts the
//! whole request.

use crate::cache::TargetCaches;
use crate::config::EngineConfig;
use crate::query::catalog::MetadataCatalog;
use crate::query::downsample::{decimate, DecimationMethod};
use crate::query::error::{QueryError, QueryResult};
use crate::query::orchestrator::{ExecutionOptions, QualityFilter, QueryOrchestrator};
use crate::query::parser::QueryModifiers;
use crate::query::resolver::{ResolverConfig, TargetResolver};
use crate::query::source::{DataSource, FetchOptions};
use crate::types::{SeriesGroup, SeriesSample, TimeRange};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Request / Response Types
// =============================================================================

/// Query request covering one or more target expressions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Target expressions to evaluate
    pub targets: Vec<TargetRequest>,
    /// Shared time range
    #[serde(alias = "timeRange")]
    pub range: RequestRange,
    /// Resolution hint for the data source (`500ms`, `1s`, `5m`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    /// Upper bound on datapoints per output series
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_data_points: Option<usize>,
    /// Drop raw samples carrying any of these quality flag bits
    #[serde(default)]
    pub exclude_flags: u32,
    /// Drop raw samples with normal (zero) flags
    #[serde(default)]
    pub exclude_normal_flag: bool,
}

/// One target expression of a request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRequest {
    /// Caller-assigned identifier echoed on every output series
    #[serde(default)]
    pub ref_id: String,
    /// Target expression text, modifier commands included
    #[serde(alias = "targetExpression")]
    pub target: String,
}

impl TargetRequest {
    /// Create a target request
    pub fn new(ref_id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            ref_id: ref_id.into(),
            target: target.into(),
        }
    }
}

/// Request time range bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRange {
    /// Range start
    pub from: Timestamp,
    /// Range end
    pub to: Timestamp,
}

/// Timestamp given as epoch milliseconds or as text
///
/// Text may be RFC 3339 or a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    /// Milliseconds since the Unix epoch
    Millis(f64),
    /// RFC 3339 or numeric text
    Text(String),
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Millis(ms) => write!(f, "{}", ms),
            Timestamp::Text(text) => f.write_str(text),
        }
    }
}

impl QueryRequest {
    /// Request over `[from, to]` milliseconds with no targets
    pub fn new(from: f64, to: f64) -> Self {
        Self {
            targets: Vec::new(),
            range: RequestRange {
                from: Timestamp::Millis(from),
                to: Timestamp::Millis(to),
            },
            interval: None,
            max_data_points: None,
            exclude_flags: 0,
            exclude_normal_flag: false,
        }
    }

    /// Add a target expression
    pub fn with_target(mut self, ref_id: impl Into<String>, target: impl Into<String>) -> Self {
        self.targets.push(TargetRequest::new(ref_id, target));
        self
    }

    /// Parsed time range
    pub fn time_range(&self) -> QueryResult<TimeRange> {
        TimeRange::parse(&self.range.from.to_string(), &self.range.to.to_string())
    }

    /// Parsed interval hint
    pub fn interval(&self) -> QueryResult<Option<Duration>> {
        self.interval.as_deref().map(parse_interval).transpose()
    }

    fn quality(&self) -> QualityFilter {
        QualityFilter {
            exclude_flags: self.exclude_flags,
            exclude_normal: self.exclude_normal_flag,
        }
    }
}

/// One output series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResponse {
    /// Display name
    pub target: String,
    /// Root target the series derives from
    pub root_target: String,
    /// Request identifier of the originating target
    pub ref_id: String,
    /// Imported catalog fields and modifier settings
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// `[value, time]` pairs in output order
    pub datapoints: Vec<[f64; 2]>,
    /// Failure of the originating target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syntax_error: Option<String>,
}

impl TargetResponse {
    fn from_group(group: SeriesGroup, samples: &[SeriesSample]) -> Self {
        Self {
            target: group.display_name,
            root_target: group.root_name,
            ref_id: group.ref_id,
            metadata: group.metadata,
            datapoints: samples.iter().map(|s| [s.value, s.time]).collect(),
            syntax_error: None,
        }
    }

    fn failed(target: &TargetRequest, error: &QueryError) -> Self {
        Self {
            target: target.target.clone(),
            root_target: target.target.clone(),
            ref_id: target.ref_id.clone(),
            metadata: BTreeMap::new(),
            datapoints: Vec::new(),
            syntax_error: Some(error.to_string()),
        }
    }
}

// =============================================================================
// Query Engine
// =============================================================================

/// Request options shared by every target
struct RequestContext {
    range: TimeRange,
    interval: Option<Duration>,
    max_data_points: Option<usize>,
    quality: QualityFilter,
}

/// Evaluates multi-target query requests
pub struct QueryEngine {
    config: EngineConfig,
    caches: Arc<TargetCaches>,
    orchestrator: QueryOrchestrator,
    permits: Semaphore,
}

impl QueryEngine {
    /// Create an engine with caches built from `config`
    pub fn new(
        config: EngineConfig,
        catalog: Arc<dyn MetadataCatalog>,
        source: Arc<dyn DataSource>,
    ) -> Self {
        let caches = Arc::new(TargetCaches::from_config(&config.cache));
        Self::with_caches(config, caches, catalog, source)
    }

    /// Create an engine sharing existing caches
    pub fn with_caches(
        config: EngineConfig,
        caches: Arc<TargetCaches>,
        catalog: Arc<dyn MetadataCatalog>,
        source: Arc<dyn DataSource>,
    ) -> Self {
        let resolver = Arc::new(TargetResolver::new(
            catalog,
            Arc::clone(&caches),
            ResolverConfig::from(&config.query),
        ));
        let orchestrator = QueryOrchestrator::new(Arc::clone(&caches), resolver, source);
        let permits = Semaphore::new(config.query.max_parallel_targets.max(1));

        Self {
            config,
            caches,
            orchestrator,
            permits,
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared caches
    pub fn caches(&self) -> &Arc<TargetCaches> {
        &self.caches
    }

    /// Evaluate every target of `request`
    pub async fn query(&self, request: &QueryRequest) -> QueryResult<Vec<TargetResponse>> {
        self.query_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Evaluate every target of `request`, aborting when `cancel` fires
    ///
    /// Responses keep the order of the request's targets. An invalid time
    /// range or interval fails the whole request.
    pub async fn query_with_cancel(
        &self,
        request: &QueryRequest,
        cancel: CancellationToken,
    ) -> QueryResult<Vec<TargetResponse>> {
        let start = Instant::now();
        let ctx = RequestContext {
            range: request.time_range()?,
            interval: request.interval()?,
            max_data_points: request.max_data_points,
            quality: request.quality(),
        };

        let results = join_all(
            request
                .targets
                .iter()
                .map(|target| self.query_target(target, &ctx, cancel.clone())),
        )
        .await;

        let mut responses = Vec::new();
        for result in results {
            responses.extend(result?);
        }

        info!(
            targets = request.targets.len(),
            series = responses.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "query completed"
        );
        Ok(responses)
    }

    async fn query_target(
        &self,
        target: &TargetRequest,
        ctx: &RequestContext,
        cancel: CancellationToken,
    ) -> QueryResult<Vec<TargetResponse>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| QueryError::internal("Target permits closed"))?;

        let start = Instant::now();
        match self.evaluate_target(target, ctx, cancel).await {
            Ok(responses) => {
                debug!(
                    ref_id = %target.ref_id,
                    series = responses.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "target evaluated"
                );
                Ok(responses)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!(
                    ref_id = %target.ref_id,
                    target = %target.target,
                    syntax = e.kind.is_syntax(),
                    error = %e,
                    "target failed"
                );
                Ok(vec![TargetResponse::failed(target, &e)])
            }
        }
    }

    async fn evaluate_target(
        &self,
        target: &TargetRequest,
        ctx: &RequestContext,
        cancel: CancellationToken,
    ) -> QueryResult<Vec<TargetResponse>> {
        let (modifiers, expression) = QueryModifiers::extract(&target.target);
        if expression.is_empty() {
            return Ok(Vec::new());
        }

        let options = ExecutionOptions {
            fetch: FetchOptions {
                interval: if modifiers.full_resolution {
                    None
                } else {
                    ctx.interval
                },
                include_peaks: modifiers.include_peaks,
            },
            quality: ctx.quality,
        };

        let groups = self
            .orchestrator
            .execute(&expression, &ctx.range, &options, cancel)
            .await?;

        let method = if modifiers.include_peaks {
            DecimationMethod::Peaks
        } else {
            DecimationMethod::Even
        };

        let mut responses = Vec::with_capacity(groups.len());
        for group in groups {
            let group = self.annotate(group, target, &modifiers);

            let mut samples = group.samples.to_vec();
            if samples.is_empty() && group.drop_if_empty {
                continue;
            }
            if let (Some(max), false) = (ctx.max_data_points, modifiers.full_resolution) {
                samples = decimate(samples, max, method);
            }

            responses.push(TargetResponse::from_group(group, &samples));
        }
        Ok(responses)
    }

    /// Attach the request identifier and modifier metadata to an output group
    fn annotate(
        &self,
        mut group: SeriesGroup,
        target: &TargetRequest,
        modifiers: &QueryModifiers,
    ) -> SeriesGroup {
        group.ref_id = target.ref_id.clone();
        group.drop_if_empty |= modifiers.drop_empty_series;

        if !modifiers.imports.is_empty() {
            if let Some(row) = self
                .orchestrator
                .resolver()
                .lookup_metadata(None, &group.root_name)
            {
                for field in &modifiers.imports {
                    if let Some(value) = row.get(field) {
                        group.metadata.insert(field.clone(), value.to_string());
                    }
                }
            }
        }

        for (key, value) in &modifiers.radial_distribution {
            group
                .metadata
                .insert(format!("RadialDistribution.{}", key), value.clone());
        }
        group
    }
}

/// Parse an interval hint: `500ms`, `1s`, `5m`, `2h`, `1d`, `1w`
///
/// A bare number is read as seconds.
pub fn parse_interval(text: &str) -> QueryResult<Duration> {
    let text = text.trim();
    let split = text
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| QueryError::format(format!("Invalid interval '{}'", text)))?;

    let seconds = match unit.trim().to_ascii_lowercase().as_str() {
        "ms" => value / 1000.0,
        "" | "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        "d" => value * 86_400.0,
        "w" => value * 604_800.0,
        other => {
            return Err(QueryError::format(format!(
                "Invalid interval unit '{}' in '{}'",
                other, text
            )))
        }
    };

    Duration::try_from_secs_f64(seconds)
        .map_err(|e| QueryError::out_of_range(format!("Invalid interval '{}'", text)).with_source(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::QueryErrorKind;

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_interval("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_interval("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_interval(" 2h ").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_interval("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_interval("1w").unwrap(), Duration::from_secs(604_800));
        assert_eq!(parse_interval("30").unwrap(), Duration::from_secs(30));

        assert_eq!(
            parse_interval("5y").unwrap_err().kind,
            QueryErrorKind::FormatError
        );
        assert_eq!(
            parse_interval("fast").unwrap_err().kind,
            QueryErrorKind::FormatError
        );
        assert_eq!(
            parse_interval("-1s").unwrap_err().kind,
            QueryErrorKind::OutOfRange
        );
    }

    #[test]
    fn test_request_deserialization() {
        let json = r#"{
            "targets": [{"refId": "A", "targetExpression": "Average(PPA:1)"}],
            "timeRange": {"from": "2024-01-01T00:00:00Z", "to": 1704067260000},
            "interval": "1s",
            "maxDataPoints": 100,
            "excludeNormalFlag": true
        }"#;
        let request: QueryRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.targets[0].ref_id, "A");
        assert_eq!(request.targets[0].target, "Average(PPA:1)");
        assert_eq!(request.max_data_points, Some(100));
        assert_eq!(request.exclude_flags, 0);
        assert!(request.exclude_normal_flag);

        let range = request.time_range().unwrap();
        assert_eq!(range.start, 1_704_067_200_000.0);
        assert_eq!(range.end, 1_704_067_260_000.0);
        assert_eq!(request.interval().unwrap(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_response_serialization() {
        let response = TargetResponse {
            target: "Average(PPA:1)".to_string(),
            root_target: "PPA:1".to_string(),
            ref_id: "A".to_string(),
            metadata: BTreeMap::new(),
            datapoints: vec![[20.0, 3000.0]],
            syntax_error: None,
        };
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["rootTarget"], "PPA:1");
        assert_eq!(json["refId"], "A");
        assert_eq!(json["datapoints"][0][0], 20.0);
        assert_eq!(json["datapoints"][0][1], 3000.0);
        assert!(json.get("metadata").is_none());
        assert!(json.get("syntaxError").is_none());
    }
}
