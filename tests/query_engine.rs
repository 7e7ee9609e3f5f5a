//! End-to-End Query Engine Tests
//!
//! Multi-target requests evaluated through [`QueryEngine`] against an
//! in-memory catalog and data source.
//!
//! # Test Coverage
//!
//! 1. **Scalar and per-point functions** - reference scenarios
//! 2. **Error isolation** - one bad target never aborts its siblings
//! 3. **Set and Slice operations** - grouping and display names
//! 4. **Label** - templates, numbering, catalog substitution
//! 5. **Modifiers** - DropEmptySeries, Imports, RadialDistribution, resolution hints
//! 6. **Decimation** - maxDataPoints, IncludePeaks, FullResolutionQuery
//! 7. **Cancellation and request validation**

use async_trait::async_trait;
use futures::StreamExt;
use kuba_expr::query::source::SampleStream;
use kuba_expr::query::{
    DataSource, FetchOptions, InMemoryCatalog, InMemoryDataSource, MetadataRow, QueryEngine,
    QueryRequest, QueryResult, TargetResponse,
};
use kuba_expr::types::flags;
use kuba_expr::{EngineConfig, SeriesKey, SeriesSample, TimeRange};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Test Helpers
// =============================================================================

fn catalog() -> InMemoryCatalog {
    let mut catalog = InMemoryCatalog::new();
    for (id, tag, signal, device) in [
        ("PPA:1", "SHELBY:FREQ", "FREQ", "SHELBY"),
        ("PPA:2", "CORDOVA:FREQ", "FREQ", "CORDOVA"),
        ("PPA:3", "SHELBY:VPHM", "VPHM", "SHELBY"),
    ] {
        catalog.add_row(
            "ActiveMeasurements",
            MetadataRow::new()
                .with("ID", id)
                .with("PointTag", tag)
                .with("SignalType", signal)
                .with("Device", device),
        );
    }
    catalog
}

fn source() -> InMemoryDataSource {
    let mut source = InMemoryDataSource::new()
        .with_series("PPA:1", &[(10.0, 1000.0), (20.0, 2000.0), (30.0, 3000.0)])
        .with_series("PPA:2", &[(5.0, 1000.0), (25.0, 2000.0), (15.0, 3000.0)]);

    // Dense series for decimation, with one spike
    for i in 0..100 {
        let value = if i == 42 { 500.0 } else { (i % 5) as f64 };
        source.push(SeriesSample::new("PPA:4", value, 10_000.0 + i as f64 * 100.0));
    }
    source
}

fn engine() -> QueryEngine {
    QueryEngine::new(
        EngineConfig::default(),
        Arc::new(catalog()),
        Arc::new(source()),
    )
}

fn request(targets: &[(&str, &str)]) -> QueryRequest {
    targets
        .iter()
        .fold(QueryRequest::new(0.0, 60_000.0), |request, (ref_id, target)| {
            request.with_target(*ref_id, *target)
        })
}

async fn run(targets: &[(&str, &str)]) -> Vec<TargetResponse> {
    engine()
        .query(&request(targets))
        .await
        .expect("query should succeed")
}

/// Data source that records the options of every fetch
struct RecordingSource {
    inner: InMemoryDataSource,
    fetches: Mutex<Vec<FetchOptions>>,
}

#[async_trait]
impl DataSource for RecordingSource {
    fn source_id(&self) -> &str {
        "recording"
    }

    async fn fetch_samples(
        &self,
        keys: &[SeriesKey],
        range: &TimeRange,
        options: &FetchOptions,
        cancel: CancellationToken,
    ) -> QueryResult<SampleStream> {
        self.fetches.lock().push(options.clone());
        self.inner.fetch_samples(keys, range, options, cancel).await
    }
}

/// Data source that fires the request token once its samples are read
struct CancellingSource {
    inner: InMemoryDataSource,
}

#[async_trait]
impl DataSource for CancellingSource {
    fn source_id(&self) -> &str {
        "cancelling"
    }

    async fn fetch_samples(
        &self,
        keys: &[SeriesKey],
        range: &TimeRange,
        options: &FetchOptions,
        cancel: CancellationToken,
    ) -> QueryResult<SampleStream> {
        let stream = self
            .inner
            .fetch_samples(keys, range, options, cancel.clone())
            .await?;
        let samples: Vec<_> = stream.collect().await;
        cancel.cancel();
        Ok(Box::pin(futures::stream::iter(samples)))
    }
}

// =============================================================================
// Functions
// =============================================================================

#[tokio::test]
async fn test_average_and_difference() {
    let responses = run(&[("A", "Average(PPA:1)"), ("B", "Difference(PPA:1)")]).await;
    assert_eq!(responses.len(), 2);

    assert_eq!(responses[0].ref_id, "A");
    assert_eq!(responses[0].target, "Average(SHELBY:FREQ)");
    assert_eq!(responses[0].root_target, "SHELBY:FREQ");
    assert_eq!(responses[0].datapoints, vec![[20.0, 3000.0]]);

    assert_eq!(responses[1].ref_id, "B");
    assert_eq!(responses[1].target, "Difference(SHELBY:FREQ)");
    assert_eq!(responses[1].datapoints, vec![[10.0, 2000.0], [10.0, 3000.0]]);
}

#[tokio::test]
async fn test_literal_targets_by_key_tag_and_filter() {
    let responses = run(&[
        ("A", "PPA:1"),
        ("B", "CORDOVA:FREQ"),
        ("C", "FILTER ActiveMeasurements WHERE SignalType = 'FREQ'"),
    ])
    .await;

    let names: Vec<(&str, &str)> = responses
        .iter()
        .map(|r| (r.ref_id.as_str(), r.target.as_str()))
        .collect();
    assert_eq!(
        names,
        vec![
            ("A", "SHELBY:FREQ"),
            ("B", "CORDOVA:FREQ"),
            ("C", "SHELBY:FREQ"),
            ("C", "CORDOVA:FREQ"),
        ]
    );
    assert_eq!(responses[1].datapoints.len(), 3);
}

#[tokio::test]
async fn test_named_parameter_target() {
    let responses = run(&[
        ("A", "SliceAdd(0, PPA:2, PPA:1; PPA:2)"),
        ("B", "Add(PPA:2, PPA:1)"),
        ("C", "SliceAdd(0, PPA:9;100, PPA:1)"),
    ])
    .await;
    assert_eq!(responses.len(), 4);

    assert_eq!(responses[0].target, "SliceAdd(PPA:2, SHELBY:FREQ)");
    assert_eq!(
        responses[0].datapoints,
        vec![[15.0, 1000.0], [45.0, 2000.0], [45.0, 3000.0]]
    );
    assert_eq!(responses[1].target, "SliceAdd(PPA:2, CORDOVA:FREQ)");

    // Outside a slice the operand must be present in the group itself
    assert_eq!(responses[2].ref_id, "B");
    assert!(responses[2].syntax_error.is_some());

    assert_eq!(
        responses[3].datapoints,
        vec![[110.0, 1000.0], [120.0, 2000.0], [130.0, 3000.0]]
    );
}

#[tokio::test]
async fn test_nested_functions() {
    let responses = run(&[("A", "Round(Average(PPA:1; PPA:2))")]).await;
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[1].target, "Round(Average(CORDOVA:FREQ))");
    assert_eq!(responses[1].datapoints, vec![[15.0, 3000.0]]);
}

// =============================================================================
// Error Isolation
// =============================================================================

#[tokio::test]
async fn test_bad_target_does_not_abort_siblings() {
    let responses = run(&[
        ("A", "Avrage(PPA:1)"),
        ("B", "Maximum(PPA:1)"),
        ("C", "Top(0, PPA:1)"),
    ])
    .await;
    assert_eq!(responses.len(), 3);

    assert_eq!(responses[0].ref_id, "A");
    assert!(responses[0].datapoints.is_empty());
    let error = responses[0].syntax_error.as_deref().unwrap();
    assert!(error.contains("Avrage"), "unexpected error: {}", error);

    assert_eq!(responses[1].syntax_error, None);
    assert_eq!(responses[1].datapoints, vec![[30.0, 3000.0]]);

    assert_eq!(responses[2].ref_id, "C");
    assert!(responses[2].syntax_error.is_some());
}

#[tokio::test]
async fn test_unbalanced_and_short_calls_are_reported() {
    let responses = run(&[("A", "Average(PPA:1"), ("B", "Top(PPA:1)")]).await;
    assert_eq!(responses.len(), 2);
    assert!(responses.iter().all(|r| r.syntax_error.is_some()));
}

#[tokio::test]
async fn test_non_ascii_filter_does_not_abort_siblings() {
    let responses = run(&[
        ("A", "FILTER ActiveMeasurements WHERE Ünit = 'V'"),
        ("B", "Count(PPA:1)"),
        ("C", "FILTER ActiveMeasurements WHERE Größe = 'ä' ORDER BY Größe TOP 1"),
    ])
    .await;

    assert!(responses
        .iter()
        .filter(|r| r.ref_id != "B")
        .all(|r| r.datapoints.is_empty()));
    let count: Vec<&TargetResponse> = responses.iter().filter(|r| r.ref_id == "B").collect();
    assert_eq!(count.len(), 1);
    assert_eq!(count[0].datapoints, vec![[3.0, 3000.0]]);
}

#[tokio::test]
async fn test_unresolved_targets_contribute_nothing() {
    let responses = run(&[("A", "NOSUCH:TAG"), ("B", "Count(PPA:1)")]).await;
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].ref_id, "B");
    assert_eq!(responses[0].datapoints, vec![[3.0, 3000.0]]);
}

// =============================================================================
// Set and Slice
// =============================================================================

#[tokio::test]
async fn test_set_operations() {
    let responses = run(&[
        ("A", "SetAverage(PPA:1; PPA:2)"),
        ("B", "SetMinimum(PPA:1; PPA:2)"),
    ])
    .await;

    assert_eq!(responses[0].target, "SetAverage(PPA:1; PPA:2)");
    assert_eq!(responses[0].datapoints, vec![[17.5, 3000.0]]);

    assert_eq!(responses[1].target, "SetMinimum = CORDOVA:FREQ");
    assert_eq!(responses[1].root_target, "CORDOVA:FREQ");
    assert_eq!(responses[1].datapoints, vec![[5.0, 1000.0]]);
}

#[tokio::test]
async fn test_slice_operations() {
    let responses = run(&[
        ("A", "SliceSum(0, PPA:1; PPA:2)"),
        ("B", "SliceMaximum(0, PPA:1; PPA:2)"),
    ])
    .await;

    assert_eq!(responses[0].target, "SliceTotal(PPA:1; PPA:2)");
    assert_eq!(
        responses[0].datapoints,
        vec![[15.0, 1000.0], [45.0, 2000.0], [45.0, 3000.0]]
    );

    assert_eq!(
        responses[1].datapoints,
        vec![[10.0, 1000.0], [25.0, 2000.0], [30.0, 3000.0]]
    );
}

// =============================================================================
// Label
// =============================================================================

#[tokio::test]
async fn test_label_single_and_numbered() {
    let responses = run(&[("A", "Label('X', PPA:1)"), ("B", "Label('X', PPA:1; PPA:2; PPA:4)")]).await;
    let names: Vec<&str> = responses.iter().map(|r| r.target.as_str()).collect();
    assert_eq!(names, vec!["X", "X 1", "X 2", "X 3"]);
}

#[tokio::test]
async fn test_label_catalog_substitution() {
    let responses = run(&[("A", "Label('{Device} {SignalType}', Average(PPA:1; PPA:2))")]).await;
    let names: Vec<&str> = responses.iter().map(|r| r.target.as_str()).collect();
    assert_eq!(names, vec!["SHELBY FREQ", "CORDOVA FREQ"]);
    assert_eq!(responses[0].datapoints, vec![[20.0, 3000.0]]);
}

// =============================================================================
// Modifiers
// =============================================================================

#[tokio::test]
async fn test_drop_empty_series() {
    let responses = run(&[("A", "PPA:9; PPA:1"), ("B", "PPA:9; PPA:1; DropEmptySeries")]).await;

    let a: Vec<&TargetResponse> = responses.iter().filter(|r| r.ref_id == "A").collect();
    assert_eq!(a.len(), 2);
    assert!(a[0].datapoints.is_empty());

    let b: Vec<&TargetResponse> = responses.iter().filter(|r| r.ref_id == "B").collect();
    assert_eq!(b.len(), 1);
    assert_eq!(b[0].target, "SHELBY:FREQ");
}

#[tokio::test]
async fn test_imports_and_radial_distribution() {
    let responses = run(&[(
        "A",
        "PPA:1; Imports={Device, SignalType, Missing}; RadialDistribution={Bins=8}",
    )])
    .await;
    assert_eq!(responses.len(), 1);

    let metadata = &responses[0].metadata;
    assert_eq!(metadata.get("Device").map(String::as_str), Some("SHELBY"));
    assert_eq!(metadata.get("SignalType").map(String::as_str), Some("FREQ"));
    assert!(!metadata.contains_key("Missing"));
    assert_eq!(
        metadata.get("RadialDistribution.Bins").map(String::as_str),
        Some("8")
    );
}

#[tokio::test]
async fn test_fetch_hints() {
    let source = Arc::new(RecordingSource {
        inner: source(),
        fetches: Mutex::new(Vec::new()),
    });
    let mut config = EngineConfig::default();
    config.query.max_parallel_targets = 1;
    let engine = QueryEngine::new(config, Arc::new(catalog()), source.clone());

    let mut req = request(&[
        ("A", "PPA:1; IncludePeaks"),
        ("B", "PPA:1; FullResolutionQuery"),
        ("C", "Interval(0, PPA:1); IncludePeaks"),
    ]);
    req.interval = Some("5s".to_string());
    engine.query(&req).await.unwrap();

    let fetches = source.fetches.lock().clone();
    assert_eq!(fetches.len(), 3);
    assert!(fetches.contains(&FetchOptions {
        interval: Some(Duration::from_secs(5)),
        include_peaks: true,
    }));
    assert!(fetches.contains(&FetchOptions {
        interval: None,
        include_peaks: false,
    }));
    assert!(fetches.contains(&FetchOptions {
        interval: Some(Duration::from_secs(5)),
        include_peaks: false,
    }));
}

#[tokio::test]
async fn test_quality_flags() {
    let source: InMemoryDataSource = vec![
        SeriesSample::new("PPA:1", 1.0, 1000.0),
        SeriesSample::new("PPA:1", 2.0, 2000.0).with_flags(flags::BAD_DATA),
        SeriesSample::new("PPA:1", 3.0, 3000.0),
    ]
    .into_iter()
    .collect();
    let engine = QueryEngine::new(EngineConfig::default(), Arc::new(catalog()), Arc::new(source));

    let mut req = request(&[("A", "PPA:1")]);
    req.exclude_flags = flags::BAD_DATA;
    let responses = engine.query(&req).await.unwrap();
    assert_eq!(responses[0].datapoints, vec![[1.0, 1000.0], [3.0, 3000.0]]);

    req.exclude_flags = 0;
    req.exclude_normal_flag = true;
    let responses = engine.query(&req).await.unwrap();
    assert_eq!(responses[0].datapoints, vec![[2.0, 2000.0]]);
}

// =============================================================================
// Decimation
// =============================================================================

#[tokio::test]
async fn test_max_data_points() {
    let engine = engine();

    let mut req = request(&[("A", "PPA:4")]);
    req.max_data_points = Some(10);
    let responses = engine.query(&req).await.unwrap();
    assert_eq!(responses[0].datapoints.len(), 10);

    let req = request(&[("A", "PPA:4; IncludePeaks")]);
    let req = QueryRequest {
        max_data_points: Some(10),
        ..req
    };
    let responses = engine.query(&req).await.unwrap();
    assert!(responses[0].datapoints.len() <= 10);
    assert!(responses[0].datapoints.iter().any(|p| p[0] == 500.0));

    let req = QueryRequest {
        max_data_points: Some(10),
        ..request(&[("A", "PPA:4; FullResolutionData")])
    };
    let responses = engine.query(&req).await.unwrap();
    assert_eq!(responses[0].datapoints.len(), 100);
}

// =============================================================================
// Cancellation and Request Validation
// =============================================================================

#[tokio::test]
async fn test_cancelled_request_yields_no_results() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = engine()
        .query_with_cancel(&request(&[("A", "PPA:1"), ("B", "Average(PPA:2)")]), cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_cancel_after_samples_arrive() {
    let engine = QueryEngine::new(
        EngineConfig::default(),
        Arc::new(catalog()),
        Arc::new(CancellingSource { inner: source() }),
    );

    let err = engine
        .query_with_cancel(
            &request(&[("A", "SliceSum(0, PPA:1; PPA:2)"), ("B", "Label('X', PPA:1)")]),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_invalid_request_options() {
    let engine = engine();

    let reversed = request(&[("A", "PPA:1")]);
    let reversed = QueryRequest {
        range: QueryRequest::new(5000.0, 1000.0).range,
        ..reversed
    };
    assert!(engine.query(&reversed).await.is_err());

    let mut bad_interval = request(&[("A", "PPA:1")]);
    bad_interval.interval = Some("soon".to_string());
    assert!(engine.query(&bad_interval).await.is_err());
}

#[tokio::test]
async fn test_request_json_round_trip_through_engine() {
    let json = r#"{
        "targets": [
            {"refId": "A", "target": "Average(PPA:1)"},
            {"refId": "B", "target": "Bogus(PPA:1)"}
        ],
        "range": {"from": 0, "to": "1970-01-01T00:01:00Z"}
    }"#;
    let req: QueryRequest = serde_json::from_str(json).unwrap();
    let responses = engine().query(&req).await.unwrap();

    let value = serde_json::to_value(&responses).unwrap();
    assert_eq!(value[0]["target"], "Average(SHELBY:FREQ)");
    assert_eq!(value[0]["datapoints"][0][0], 20.0);
    assert!(value[0].get("syntaxError").is_none());
    assert!(value[1]["syntaxError"].is_string());
}
