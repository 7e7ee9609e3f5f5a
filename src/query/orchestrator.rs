//! Query Orchestrator
//!
//! Evaluates one target expression, depth first. Raw data is fetched once
//! per expression: every literal target anywhere in the call tree is
//! resolved first, the data source is asked for all of their keys in a
//! single cancellable call, and the tree is then evaluated synchronously
//! over the partitioned samples.
//!
//! ```text
//!   "SliceAdd(0, REF, Max(PPA:1); REF)"
//!        │
//!        ├─ plan      parse + resolve literals ──► keys {PPA:1, REF}
//!        ├─ fetch     DataSource::fetch_samples ──► SampleDataset
//!        └─ evaluate  calls (inner first) ──► Vec<SeriesGroup>
//!                         None  : per input group
//!                         Set   : flattened inputs, one group
//!                         Slice : TimeSliceScanner, per slice
//!                         Label : rename only
//! ```

use crate::cache::TargetCaches;
use crate::query::error::{QueryError, QueryResult};
use crate::query::eval::{self, params, EvalContext, TargetNames};
use crate::query::functions::SeriesFunction;
use crate::query::parser::{parse_cached, unquote, ParsedFunction};
use crate::query::resolver::TargetResolver;
use crate::query::slice::TimeSliceScanner;
use crate::query::source::{DataSource, FetchOptions, SampleStream};
use crate::types::{
    flags, GroupOperation, SampleSeq, SeriesGroup, SeriesKey, SeriesSample, TimeRange,
};
use futures::StreamExt;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::pin::pin;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

lazy_static! {
    static ref LABEL_FIELD: Regex =
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_.]*)\}").expect("valid regex");
}

// ============================================================================
// Options and fetched data
// ============================================================================

/// Sample quality filter applied while collecting raw data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QualityFilter {
    /// Drop samples carrying any of these flag bits
    pub exclude_flags: u32,
    /// Drop samples with normal (zero) flags
    pub exclude_normal: bool,
}

impl QualityFilter {
    /// True when the sample passes the filter
    pub fn keeps(&self, sample: &SeriesSample) -> bool {
        if self.exclude_normal && sample.flags == flags::NORMAL {
            return false;
        }
        sample.flags & self.exclude_flags == 0
    }
}

/// Settings for one expression evaluation
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Hints forwarded to the data source
    pub fetch: FetchOptions,
    /// Raw sample filter
    pub quality: QualityFilter,
}

/// Raw samples for one expression, partitioned per key and sorted by time
#[derive(Debug, Default)]
pub struct SampleDataset {
    series: HashMap<SeriesKey, Arc<[SeriesSample]>>,
}

impl SampleDataset {
    /// Drain a sample stream, stopping early when `cancel` fires
    ///
    /// A cancelled collection returns an error, never partial data.
    pub async fn collect(
        stream: SampleStream,
        quality: &QualityFilter,
        cancel: &CancellationToken,
    ) -> QueryResult<Self> {
        let mut partitions: HashMap<SeriesKey, Vec<SeriesSample>> = HashMap::new();
        let mut stream = pin!(stream.take_until(cancel.cancelled()));

        while let Some(item) = stream.next().await {
            let sample = item?;
            if quality.keeps(&sample) {
                partitions.entry(sample.key.clone()).or_default().push(sample);
            }
        }

        if cancel.is_cancelled() {
            return Err(QueryError::cancelled());
        }

        let series = partitions
            .into_iter()
            .map(|(key, mut samples)| {
                samples.sort_by(|a, b| a.time.total_cmp(&b.time));
                (key, Arc::from(samples))
            })
            .collect();
        Ok(Self { series })
    }

    /// Samples of one key, empty when none were fetched
    pub fn samples(&self, key: &SeriesKey) -> SampleSeq {
        match self.series.get(key) {
            Some(samples) => SampleSeq::from_shared(Arc::clone(samples)),
            None => SampleSeq::empty(),
        }
    }

    /// Number of keys with data
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// True when no key has data
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Total samples held
    pub fn sample_count(&self) -> usize {
        self.series.values().map(|s| s.len()).sum()
    }
}

/// Literal targets reachable from an expression
#[derive(Debug, Default)]
struct QueryPlan {
    keys: Vec<SeriesKey>,
    seen: HashSet<SeriesKey>,
    names: TargetNames,
    disable_peaks: bool,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Evaluates target expressions against a catalog and a data source
pub struct QueryOrchestrator {
    caches: Arc<TargetCaches>,
    resolver: Arc<TargetResolver>,
    source: Arc<dyn DataSource>,
}

impl QueryOrchestrator {
    /// Create an orchestrator sharing the given caches and resolver
    pub fn new(
        caches: Arc<TargetCaches>,
        resolver: Arc<TargetResolver>,
        source: Arc<dyn DataSource>,
    ) -> Self {
        Self {
            caches,
            resolver,
            source,
        }
    }

    /// Resolver used for literal targets and label lookups
    pub fn resolver(&self) -> &Arc<TargetResolver> {
        &self.resolver
    }

    /// Evaluate one expression (modifier commands already removed)
    ///
    /// Returned groups hold lazy sample sequences over data that has
    /// already been fetched; reading them performs no I/O.
    pub async fn execute(
        &self,
        expression: &str,
        range: &TimeRange,
        options: &ExecutionOptions,
        cancel: CancellationToken,
    ) -> QueryResult<Vec<SeriesGroup>> {
        if cancel.is_cancelled() {
            return Err(QueryError::cancelled());
        }

        let mut plan = QueryPlan::default();
        self.collect_targets(expression, &mut plan)?;

        let mut fetch = options.fetch.clone();
        if plan.disable_peaks {
            fetch.include_peaks = false;
        }

        let dataset = if plan.keys.is_empty() {
            SampleDataset::default()
        } else {
            let start = Instant::now();
            let stream = self
                .source
                .fetch_samples(&plan.keys, range, &fetch, cancel.clone())
                .await?;
            let dataset = SampleDataset::collect(stream, &options.quality, &cancel).await?;
            debug!(
                source = self.source.source_id(),
                keys = plan.keys.len(),
                samples = dataset.sample_count(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "fetched raw samples"
            );
            dataset
        };

        let evaluator = Evaluator {
            caches: &self.caches,
            resolver: &self.resolver,
            dataset: &dataset,
            names: &plan.names,
            cancel: &cancel,
        };
        evaluator.evaluate(expression)
    }

    /// Parse the call tree and resolve every literal target in it
    fn collect_targets(&self, expression: &str, plan: &mut QueryPlan) -> QueryResult<()> {
        let parsed = parse_cached(&self.caches, expression)?;

        for function in &parsed.functions {
            if function.kind == SeriesFunction::Interval {
                let offset = usize::from(function.group_operation == GroupOperation::Slice);
                if function
                    .parameters
                    .get(offset)
                    .is_some_and(|p| p.trim().parse::<f64>() == Ok(0.0))
                {
                    plan.disable_peaks = true;
                }
            }
            self.collect_targets(&function.inner_expression, plan)?;
        }

        if !parsed.reduced_text.is_empty() {
            let map = self.resolver.resolve(&parsed.reduced_text)?;
            plan.names.extend_from(&map);
            for key in map.keys() {
                if plan.seen.insert(key.clone()) {
                    plan.keys.push(key.clone());
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Evaluation over fetched data
// ============================================================================

struct Evaluator<'e> {
    caches: &'e TargetCaches,
    resolver: &'e TargetResolver,
    dataset: &'e SampleDataset,
    names: &'e TargetNames,
    cancel: &'e CancellationToken,
}

impl Evaluator<'_> {
    fn check_cancelled(&self) -> QueryResult<()> {
        if self.cancel.is_cancelled() {
            return Err(QueryError::cancelled());
        }
        Ok(())
    }

    fn evaluate(&self, expression: &str) -> QueryResult<Vec<SeriesGroup>> {
        let parsed = parse_cached(self.caches, expression)?;
        let mut groups = Vec::new();

        for function in &parsed.functions {
            self.check_cancelled()?;
            groups.extend(self.evaluate_call(function)?);
        }

        if !parsed.reduced_text.is_empty() {
            groups.extend(self.literal_groups(&parsed.reduced_text)?);
        }
        Ok(groups)
    }

    fn literal_groups(&self, text: &str) -> QueryResult<Vec<SeriesGroup>> {
        let map = self.resolver.resolve(text)?;
        Ok(map
            .iter()
            .map(|(key, display)| {
                let root = if map.is_aliased(key) {
                    key.as_str()
                } else {
                    display
                };
                SeriesGroup::new(display, root, self.dataset.samples(key))
            })
            .collect())
    }

    fn evaluate_call(&self, function: &ParsedFunction) -> QueryResult<Vec<SeriesGroup>> {
        let inputs = self.evaluate(&function.inner_expression)?;

        if function.kind == SeriesFunction::Label {
            return self.label(function, inputs);
        }

        match function.group_operation {
            GroupOperation::None => self.apply_each(function, inputs),
            GroupOperation::Set => self.apply_set(function, inputs),
            GroupOperation::Slice => self.apply_slice(function, inputs),
        }
    }

    fn apply_each(
        &self,
        function: &ParsedFunction,
        inputs: Vec<SeriesGroup>,
    ) -> QueryResult<Vec<SeriesGroup>> {
        let ctx = EvalContext::new(GroupOperation::None, self.names);
        inputs
            .iter()
            .map(|group| {
                self.check_cancelled()?;
                let samples = eval::apply(
                    function.kind,
                    &function.parameters,
                    group.samples.clone(),
                    &ctx,
                )?;
                Ok(group.derive(call_name(function, &group.display_name), samples))
            })
            .collect()
    }

    fn apply_set(
        &self,
        function: &ParsedFunction,
        inputs: Vec<SeriesGroup>,
    ) -> QueryResult<Vec<SeriesGroup>> {
        self.check_cancelled()?;
        let ctx = EvalContext::new(GroupOperation::Set, self.names);
        let flattened = SampleSeq::concat(inputs.iter().map(|g| g.samples.clone()).collect());
        let samples = eval::apply(function.kind, &function.parameters, flattened, &ctx)?;

        if function.kind.returns_representative() {
            let result = samples.to_vec();
            let source = result.first().and_then(|sample| {
                inputs
                    .iter()
                    .find(|g| g.samples.iter().next().is_some_and(|s| s.key == sample.key))
            });

            if let Some(source) = source {
                let name = format!("Set{} = {}", function.kind, source.root_name);
                let root = source.root_name.clone();
                return Ok(vec![SeriesGroup::new(name, root, SampleSeq::from_vec(result))]);
            }
            return Ok(vec![SeriesGroup::new(
                function.to_string(),
                function.inner_expression.clone(),
                SampleSeq::from_vec(result),
            )]);
        }

        Ok(vec![SeriesGroup::new(
            function.to_string(),
            function.inner_expression.clone(),
            samples,
        )])
    }

    fn apply_slice(
        &self,
        function: &ParsedFunction,
        inputs: Vec<SeriesGroup>,
    ) -> QueryResult<Vec<SeriesGroup>> {
        let Some((tolerance, parameters)) = function.parameters.split_first() else {
            return Err(QueryError::parameter_count(
                &format!("Slice{}", function.kind),
                0,
                function.kind.spec().required + 1,
            ));
        };

        let set_ctx = EvalContext::new(GroupOperation::Set, self.names);
        let flattened = inputs.iter().flat_map(|g| g.samples.iter());
        let tolerance_ms = params::parse_float(tolerance, flattened, &set_ctx, true)? * 1000.0;

        let ctx = EvalContext::new(GroupOperation::Slice, self.names);
        let mut scanner = TimeSliceScanner::from_groups(&inputs, tolerance_ms);
        let mut output: Vec<SeriesSample> = Vec::new();

        while !scanner.data_read_complete() {
            self.check_cancelled()?;
            let slice = scanner.read_next_time_slice(true);
            let result = eval::apply(function.kind, parameters, SampleSeq::from_vec(slice), &ctx)?;
            output.extend(result.iter());
        }

        if function.kind.is_scalar() {
            return Ok(vec![SeriesGroup::new(
                call_name(function, &function.inner_expression),
                function.inner_expression.clone(),
                SampleSeq::from_vec(output),
            )]);
        }

        // Regroup series output by key, first seen first
        let mut order: Vec<SeriesKey> = Vec::new();
        let mut by_key: HashMap<SeriesKey, Vec<SeriesSample>> = HashMap::new();
        for sample in output {
            if !by_key.contains_key(&sample.key) {
                order.push(sample.key.clone());
            }
            by_key.entry(sample.key.clone()).or_default().push(sample);
        }

        Ok(order
            .into_iter()
            .map(|key| {
                let source = inputs
                    .iter()
                    .find(|g| g.samples.iter().next().is_some_and(|s| s.key == key));
                let (display, root) = match source {
                    Some(g) => (g.display_name.clone(), g.root_name.clone()),
                    None => (key.to_string(), key.to_string()),
                };
                let samples = by_key.remove(&key).unwrap_or_default();
                SeriesGroup::new(call_name(function, &display), root, SampleSeq::from_vec(samples))
            })
            .collect())
    }

    fn label(
        &self,
        function: &ParsedFunction,
        inputs: Vec<SeriesGroup>,
    ) -> QueryResult<Vec<SeriesGroup>> {
        let Some(parameter) = function.parameters.first() else {
            return Err(QueryError::parameter_count("Label", 0, 1));
        };
        let template = unquote(parameter);

        let (table, body) = match template.split_once('.') {
            Some((prefix, rest))
                if !prefix.contains('{')
                    && self.resolver.catalog().has_table(prefix.trim()) =>
            {
                (Some(prefix.trim()), rest)
            }
            _ => (None, template),
        };

        let mut substituted = false;
        let mut names: Vec<String> = inputs
            .iter()
            .map(|group| {
                let rendered = self.render_label(template, table, body, &group.root_name);
                substituted |= rendered != body;
                rendered
            })
            .collect();

        if !substituted && names.len() > 1 {
            names = (1..=names.len()).map(|i| format!("{} {}", body, i)).collect();
        }
        dedupe_names(&mut names);

        Ok(inputs
            .into_iter()
            .zip(names)
            .map(|(group, name)| SeriesGroup {
                display_name: name,
                ..group
            })
            .collect())
    }

    fn render_label(&self, template: &str, table: Option<&str>, body: &str, root: &str) -> String {
        if !body.contains('{') {
            return body.to_string();
        }

        let key = format!("{}@{}", template, root);
        self.caches.labels.get_or_insert_with(key, || {
            let Some(row) = self.resolver.lookup_metadata(table, root) else {
                return body.to_string();
            };
            LABEL_FIELD
                .replace_all(body, |caps: &Captures| {
                    row.get(&caps[1])
                        .map(String::from)
                        .unwrap_or_else(|| caps[0].to_string())
                })
                .into_owned()
        })
    }
}

/// `{prefix}{Fn}({params, }{input})`, leaving out the slice tolerance
fn call_name(function: &ParsedFunction, input: &str) -> String {
    let skip = usize::from(function.group_operation == GroupOperation::Slice);
    let mut name = format!("{}{}(", function.group_operation.prefix(), function.kind);
    for parameter in function.parameters.iter().skip(skip) {
        name.push_str(parameter);
        name.push_str(", ");
    }
    name.push_str(input);
    name.push(')');
    name
}

/// Suffix repeated names with ` 2`, ` 3`, ...
///
/// A suffix already present in the list is skipped, so the result never
/// holds two equal names.
fn dedupe_names(names: &mut [String]) {
    let mut taken: HashSet<String> = names.iter().cloned().collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut next: HashMap<String, usize> = HashMap::new();

    for name in names.iter_mut() {
        if seen.insert(name.clone()) {
            continue;
        }
        let counter = next.entry(name.clone()).or_insert(1);
        let renamed = loop {
            *counter += 1;
            let candidate = format!("{} {}", name, counter);
            if !taken.contains(&candidate) {
                break candidate;
            }
        };
        taken.insert(renamed.clone());
        seen.insert(renamed.clone());
        *name = renamed;
    }
}
