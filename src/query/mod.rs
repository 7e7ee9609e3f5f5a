//! Query expression evaluation
//!
//! Target expressions name raw series (encoded keys, GUIDs, point tags or
//! FILTER clauses) wrapped in any depth of series functions. Evaluation
//! resolves the literals against a metadata catalog, fetches raw samples
//! from a data source and runs the function tree over them.
//!
//! # Architecture
//!
//! ```text
//! QueryRequest
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Engine     │  per target, bounded concurrency, error isolation
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Parse      │  modifiers, function calls, literal remainder
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Resolve    │  keys, GUIDs, tags, FILTER → series keys
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Fetch      │  one DataSource call per expression
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Evaluate   │  None / Set / Slice function application
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Format     │  decimation, metadata, [value, time] pairs
//! └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use kuba_expr::query::{QueryEngine, QueryRequest};
//!
//! let engine = QueryEngine::new(config, catalog, source);
//! let request = QueryRequest::new(0.0, 60_000.0)
//!     .with_target("A", "SetAverage(FILTER ActiveMeasurements WHERE SignalType='FREQ')");
//! let responses = engine.query(&request).await?;
//! ```

pub mod catalog;
pub mod downsample;
pub mod engine;
pub mod error;
pub mod eval;
pub mod functions;
pub mod orchestrator;
pub mod parser;
pub mod resolver;
pub mod slice;
pub mod source;

// Re-export main types
pub use catalog::{InMemoryCatalog, MetadataCatalog, MetadataRow};
pub use downsample::{decimate, DecimationMethod};
pub use engine::{
    parse_interval, QueryEngine, QueryRequest, RequestRange, TargetRequest, TargetResponse,
    Timestamp,
};
pub use error::{QueryError, QueryErrorKind, QueryResult};
pub use functions::{ExecutionMode, FunctionSpec, ReturnType, SeriesFunction};
pub use orchestrator::{ExecutionOptions, QualityFilter, QueryOrchestrator, SampleDataset};
pub use parser::{parse_expression, ParsedExpression, ParsedFunction, QueryModifiers};
pub use resolver::{ResolverConfig, TargetMap, TargetResolver};
pub use slice::TimeSliceScanner;
pub use source::{DataSource, FetchOptions, InMemoryDataSource, SampleStream};
