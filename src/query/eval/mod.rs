//! Series Evaluation Engine
//!
//! Applies one registered function to one sample sequence. Parameters are
//! parsed up front so every error surfaces before any sample is produced;
//! the returned sequence is then either a lazy wrapper over the input
//! (deferred functions) or an already materialized result (immediate
//! functions).
//!
//! ```text
//!   parameters ──► params::parse_* ──┐
//!                                    ▼
//!   SampleSeq ───────────────► apply(function) ──► SampleSeq
//!                  deferred:  map / filter / lookback, lazy
//!                  immediate: to_vec + stats::*, eager
//! ```

pub mod params;
pub mod stats;

use crate::query::error::{QueryError, QueryResult};
use crate::query::functions::SeriesFunction;
use crate::query::resolver::TargetMap;
use crate::types::{GroupOperation, SampleSeq, SeriesKey, SeriesSample};
use crate::units::{self, AngleUnit, TimeUnit};
use params::{angle_unit_at, bool_at, parse_count, parse_float, parse_int, parse_percentage, time_unit_at};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Evaluation Context
// ============================================================================

/// Display names and aliases that parameters may use to name a series
#[derive(Debug, Clone, Default)]
pub struct TargetNames {
    names: HashMap<String, SeriesKey>,
}

impl TargetNames {
    /// Empty name table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a name; the first registration of a name wins
    pub fn add(&mut self, name: &str, key: SeriesKey) {
        self.names
            .entry(name.trim().to_ascii_lowercase())
            .or_insert(key);
    }

    /// Register every display name and alias of a resolved target map
    pub fn extend_from(&mut self, map: &TargetMap) {
        for (key, display) in map.iter() {
            self.add(display, key.clone());
        }
        for (alias, key) in map.aliases() {
            self.add(alias, key.clone());
        }
    }

    /// Key registered under `name` (case-insensitive)
    pub fn key_for(&self, name: &str) -> Option<&SeriesKey> {
        self.names.get(&name.trim().to_ascii_lowercase())
    }

    /// Number of registered names
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True when no names are registered
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Per-call evaluation settings
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    operation: GroupOperation,
    names: &'a TargetNames,
}

impl<'a> EvalContext<'a> {
    /// Context for a call made under `operation`
    pub fn new(operation: GroupOperation, names: &'a TargetNames) -> Self {
        Self { operation, names }
    }

    /// Group operation of the call
    pub fn operation(&self) -> GroupOperation {
        self.operation
    }

    /// True while evaluating one time slice
    pub fn is_slice(&self) -> bool {
        self.operation == GroupOperation::Slice
    }

    /// Value of the first sample belonging to the target called `name`
    ///
    /// `name` matches a series key directly or through a registered
    /// display name or alias.
    pub fn target_value<I>(&self, mut samples: I, name: &str) -> Option<f64>
    where
        I: Iterator<Item = SeriesSample>,
    {
        let named = self.names.key_for(name);
        samples
            .find(|s| s.key.matches(name) || named == Some(&s.key))
            .map(|s| s.value)
    }
}

// ============================================================================
// Function application
// ============================================================================

/// Apply `function` to `source`
///
/// `parameters` excludes the slice tolerance. `Label` passes its input
/// through; renaming happens at the group level.
pub fn apply(
    function: SeriesFunction,
    parameters: &[String],
    source: SampleSeq,
    ctx: &EvalContext<'_>,
) -> QueryResult<SampleSeq> {
    use SeriesFunction::*;

    let seq = match function {
        Average => scalar(stats::average(source.iter())),
        Minimum => scalar(stats::minimum(source.iter())),
        Maximum => scalar(stats::maximum(source.iter())),
        Total => scalar(stats::total(source.iter())),
        Range => scalar(stats::range(source.iter())),
        Count => scalar(stats::count(source.iter())),
        Distinct => SampleSeq::from_vec(stats::distinct(&source.to_vec())),

        AbsoluteValue => map_values(source, f64::abs),
        Add | Subtract | Multiply | Divide => {
            let operand = parse_float(required(parameters, 0, function)?, source.iter(), ctx, false)?;
            match function {
                Add => map_values(source, move |v| v + operand),
                Subtract => map_values(source, move |v| v - operand),
                Multiply => map_values(source, move |v| v * operand),
                _ => map_values(source, move |v| v / operand),
            }
        }
        Round => {
            let decimals = parameters.first().map(|p| parse_int(p)).transpose()?.unwrap_or(0);
            let factor = 10f64.powi(decimals);
            map_values(source, move |v| (v * factor).round() / factor)
        }
        Floor => map_values(source, f64::floor),
        Ceiling => map_values(source, f64::ceil),
        Truncate => map_values(source, f64::trunc),

        StandardDeviation => {
            let sample_calc = bool_at(parameters, 0, false)?;
            scalar(stats::standard_deviation(&source.to_vec(), sample_calc))
        }
        Median => scalar(stats::median(source.to_vec())),
        Mode => scalar(stats::mode(&source.to_vec())),

        Top | Bottom | Random => {
            let values = source.to_vec();
            let count = parse_count(required(parameters, 0, function)?, &values, ctx)?;
            let normalize = bool_at(parameters, 1, true)?;
            SampleSeq::from_vec(match function {
                Top => stats::top(&values, count, normalize),
                Bottom => stats::bottom(&values, count, normalize),
                _ => stats::random(&values, count, normalize),
            })
        }
        First | Last => {
            let values = source.to_vec();
            let count = match parameters.first() {
                Some(p) => parse_count(p, &values, ctx)?,
                None => 1,
            };
            SampleSeq::from_vec(if function == First {
                stats::first(&values, count)
            } else {
                stats::last(&values, count)
            })
        }
        Percentile => {
            let percent = parse_percentage(required(parameters, 0, function)?, true)?;
            scalar(stats::percentile(source.to_vec(), percent))
        }

        Difference => with_lookback(source, |previous, current| current.value - previous.value),
        TimeDifference => {
            let unit = time_unit_at(parameters, 0, TimeUnit::Seconds)?;
            with_lookback(source, move |previous, current| {
                unit.from_millis(current.time - previous.time)
            })
        }
        Derivative => {
            let unit = time_unit_at(parameters, 0, TimeUnit::Seconds)?;
            with_lookback(source, move |previous, current| {
                (current.value - previous.value) / unit.from_millis(current.time - previous.time)
            })
        }
        TimeIntegration => {
            let unit = time_unit_at(parameters, 0, TimeUnit::Hours)?;
            scalar(stats::time_integration(source.iter(), unit.seconds()))
        }
        Interval => {
            let unit = time_unit_at(parameters, 1, TimeUnit::Seconds)?;
            let span = parse_float(required(parameters, 0, function)?, source.iter(), ctx, true)?;
            every_interval(source, unit.to_millis(span))
        }

        IncludeRange | ExcludeRange => {
            let low = parse_float(required(parameters, 0, function)?, source.iter(), ctx, false)?;
            let high = parse_float(required(parameters, 1, function)?, source.iter(), ctx, false)?;
            let low_inclusive = bool_at(parameters, 2, false)?;
            let high_inclusive = bool_at(parameters, 3, low_inclusive)?;

            if function == IncludeRange {
                source.filter(move |s| {
                    (if low_inclusive { s.value >= low } else { s.value > low })
                        && (if high_inclusive { s.value <= high } else { s.value < high })
                })
            } else {
                source.filter(move |s| {
                    (if low_inclusive { s.value <= low } else { s.value < low })
                        || (if high_inclusive { s.value >= high } else { s.value > high })
                })
            }
        }
        FilterNaN => {
            let also_infinity = bool_at(parameters, 0, true)?;
            source.filter(move |s| !(s.value.is_nan() || (also_infinity && s.value.is_infinite())))
        }

        UnwrapAngle => {
            let unit = angle_unit_at(parameters, 0, AngleUnit::Degrees)?;
            let values = source.to_vec();
            let raw: Vec<f64> = values.iter().map(|s| s.value).collect();
            let unwrapped = units::unwrap_angles(&raw, unit);
            SampleSeq::from_vec(
                values
                    .iter()
                    .zip(unwrapped)
                    .map(|(s, angle)| s.with_value(angle))
                    .collect(),
            )
        }
        WrapAngle => {
            let unit = angle_unit_at(parameters, 0, AngleUnit::Degrees)?;
            map_values(source, move |v| units::wrap_angle(v, unit))
        }

        Label => source,
    };

    Ok(seq)
}

fn required<'p>(parameters: &'p [String], index: usize, function: SeriesFunction) -> QueryResult<&'p str> {
    parameters.get(index).map(String::as_str).ok_or_else(|| {
        QueryError::parameter_count(function.name(), parameters.len(), function.spec().required)
    })
}

fn scalar(sample: Option<SeriesSample>) -> SampleSeq {
    SampleSeq::from_vec(sample.into_iter().collect())
}

fn map_values<F>(source: SampleSeq, f: F) -> SampleSeq
where
    F: Fn(f64) -> f64 + Send + Sync + 'static,
{
    source.map(move |mut s| {
        s.value = f(s.value);
        s
    })
}

/// One output per input after the first, computed from the sample pair and
/// carrying the previous sample's key
fn with_lookback<F>(source: SampleSeq, f: F) -> SampleSeq
where
    F: Fn(&SeriesSample, &SeriesSample) -> f64 + Send + Sync + 'static,
{
    let f = Arc::new(f);
    SampleSeq::from_fn(move || {
        let f = Arc::clone(&f);
        let mut previous: Option<SeriesSample> = None;
        Box::new(source.iter().filter_map(move |current| {
            let output = previous.as_ref().map(|p| SeriesSample {
                key: p.key.clone(),
                value: f(p, &current),
                time: current.time,
                flags: current.flags,
            });
            previous = Some(current);
            output
        }))
    })
}

/// Keep the first sample and each one more than `span_ms` after the last kept
fn every_interval(source: SampleSeq, span_ms: f64) -> SampleSeq {
    SampleSeq::from_fn(move || {
        let mut last_time: Option<f64> = None;
        Box::new(source.iter().filter(move |s| match last_time {
            Some(t) if s.time - t <= span_ms => false,
            _ => {
                last_time = Some(s.time);
                true
            }
        }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::QueryErrorKind;

    fn ppa1() -> SampleSeq {
        SampleSeq::from_vec(vec![
            SeriesSample::new("PPA:1", 10.0, 1000.0),
            SeriesSample::new("PPA:1", 20.0, 2000.0),
            SeriesSample::new("PPA:1", 30.0, 3000.0),
        ])
    }

    fn run(function: SeriesFunction, params: &[&str], source: SampleSeq) -> QueryResult<Vec<(f64, f64)>> {
        let names = TargetNames::new();
        let ctx = EvalContext::new(GroupOperation::None, &names);
        let params: Vec<String> = params.iter().map(|p| p.to_string()).collect();
        let seq = apply(function, &params, source, &ctx)?;
        Ok(seq.iter().map(|s| (s.value, s.time)).collect())
    }

    #[test]
    fn test_average_scenario() {
        assert_eq!(run(SeriesFunction::Average, &[], ppa1()).unwrap(), vec![(20.0, 3000.0)]);
    }

    #[test]
    fn test_difference_scenario() {
        assert_eq!(
            run(SeriesFunction::Difference, &[], ppa1()).unwrap(),
            vec![(10.0, 2000.0), (10.0, 3000.0)]
        );
    }

    #[test]
    fn test_scalars_on_empty_input() {
        for function in [SeriesFunction::Average, SeriesFunction::Count, SeriesFunction::Maximum] {
            assert!(run(function, &[], SampleSeq::empty()).unwrap().is_empty());
        }
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(
            run(SeriesFunction::Add, &["1.5"], ppa1()).unwrap()[0],
            (11.5, 1000.0)
        );
        assert_eq!(
            run(SeriesFunction::Divide, &["4"], ppa1()).unwrap()[1],
            (5.0, 2000.0)
        );
        let rounded = run(
            SeriesFunction::Round,
            &["1"],
            SampleSeq::from_vec(vec![SeriesSample::new("A", 2.345, 1.0)]),
        )
        .unwrap();
        assert!((rounded[0].0 - 2.3).abs() < 1e-9);
    }

    #[test]
    fn test_time_functions() {
        assert_eq!(
            run(SeriesFunction::TimeDifference, &["Milliseconds"], ppa1()).unwrap(),
            vec![(1000.0, 2000.0), (1000.0, 3000.0)]
        );
        assert_eq!(
            run(SeriesFunction::Derivative, &[], ppa1()).unwrap(),
            vec![(10.0, 2000.0), (10.0, 3000.0)]
        );

        let interval = run(SeriesFunction::Interval, &["1.5"], ppa1()).unwrap();
        assert_eq!(interval, vec![(10.0, 1000.0), (30.0, 3000.0)]);
    }

    #[test]
    fn test_range_filters() {
        let include = run(SeriesFunction::IncludeRange, &["10", "30"], ppa1()).unwrap();
        assert_eq!(include, vec![(20.0, 2000.0)]);

        let inclusive = run(SeriesFunction::IncludeRange, &["10", "30", "true"], ppa1()).unwrap();
        assert_eq!(inclusive.len(), 3);

        let low_only = run(SeriesFunction::IncludeRange, &["10", "30", "true", "false"], ppa1()).unwrap();
        assert_eq!(low_only.len(), 2);

        let exclude = run(SeriesFunction::ExcludeRange, &["15", "25"], ppa1()).unwrap();
        assert_eq!(exclude, vec![(10.0, 1000.0), (30.0, 3000.0)]);
    }

    #[test]
    fn test_filter_nan() {
        let source = SampleSeq::from_vec(vec![
            SeriesSample::new("A", f64::NAN, 1.0),
            SeriesSample::new("A", f64::INFINITY, 2.0),
            SeriesSample::new("A", 1.0, 3.0),
        ]);
        assert_eq!(run(SeriesFunction::FilterNaN, &[], source.clone()).unwrap().len(), 1);
        assert_eq!(run(SeriesFunction::FilterNaN, &["false"], source).unwrap().len(), 2);
    }

    #[test]
    fn test_angles() {
        let source = SampleSeq::from_vec(vec![
            SeriesSample::new("A", 170.0, 1.0),
            SeriesSample::new("A", -170.0, 2.0),
            SeriesSample::new("A", 190.0, 3.0),
        ]);
        let unwrapped = run(SeriesFunction::UnwrapAngle, &[], source.clone()).unwrap();
        assert_eq!(unwrapped.iter().map(|p| p.0).collect::<Vec<_>>(), vec![170.0, 190.0, 190.0]);

        let wrapped = run(SeriesFunction::WrapAngle, &["Degrees"], source).unwrap();
        assert_eq!(wrapped[2].0, -170.0);
    }

    #[test]
    fn test_parameter_errors() {
        let err = run(SeriesFunction::Add, &["PPA:9"], ppa1()).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::UnresolvedParameterTarget);

        let err = run(SeriesFunction::Percentile, &["101"], ppa1()).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::OutOfRange);

        let err = run(SeriesFunction::Top, &["many"], ppa1()).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::UnresolvedParameterTarget);

        let err = run(SeriesFunction::Add, &[], ppa1()).unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ParameterCountMismatch);
    }

    #[test]
    fn test_named_parameter_uses_source() {
        let source = SampleSeq::concat(vec![
            ppa1(),
            SampleSeq::from_vec(vec![SeriesSample::new("REF", 5.0, 1000.0)]),
        ]);
        let out = run(SeriesFunction::Subtract, &["ref"], source).unwrap();
        assert_eq!(out[0], (5.0, 1000.0));
    }

    #[test]
    fn test_deferred_output_is_replayable() {
        let names = TargetNames::new();
        let ctx = EvalContext::new(GroupOperation::None, &names);
        let seq = apply(SeriesFunction::Difference, &[], ppa1(), &ctx).unwrap();
        assert_eq!(seq.iter().count(), 2);
        assert_eq!(seq.iter().count(), 2);
    }

    #[test]
    fn test_selection_functions() {
        assert_eq!(
            run(SeriesFunction::Top, &["1", "false"], ppa1()).unwrap(),
            vec![(30.0, 3000.0)]
        );
        assert_eq!(
            run(SeriesFunction::Last, &[], ppa1()).unwrap(),
            vec![(30.0, 3000.0)]
        );
        assert_eq!(run(SeriesFunction::First, &["67%"], ppa1()).unwrap().len(), 2);
        assert_eq!(
            run(SeriesFunction::Percentile, &["50%"], ppa1()).unwrap(),
            vec![(20.0, 3000.0)]
        );
    }
}
