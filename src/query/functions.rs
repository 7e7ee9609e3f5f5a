//! Series function registry
//!
//! The closed table of functions usable in target expressions. Each entry
//! declares its canonical name, synonyms, parameter counts, whether it
//! reduces to a scalar or returns a series, and how it consumes its input.
//! Lookup is case-insensitive and accepts `Set`/`Slice` prefixes.

use crate::types::GroupOperation;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fmt;

/// Every function the engine can evaluate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum SeriesFunction {
    Average,
    Minimum,
    Maximum,
    Total,
    Range,
    Count,
    Distinct,
    AbsoluteValue,
    Add,
    Subtract,
    Multiply,
    Divide,
    Round,
    Floor,
    Ceiling,
    Truncate,
    StandardDeviation,
    Median,
    Mode,
    Top,
    Bottom,
    Random,
    First,
    Last,
    Percentile,
    Difference,
    TimeDifference,
    Derivative,
    TimeIntegration,
    Interval,
    IncludeRange,
    ExcludeRange,
    FilterNaN,
    UnwrapAngle,
    WrapAngle,
    Label,
}

/// Output cardinality of a function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    /// At most one sample
    Scalar,
    /// Zero or more samples
    Series,
}

/// How a function consumes its input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Reads the whole input, emits one sample (or none for empty input)
    ImmediateScalar,
    /// Emits per input sample, safe to stream
    Deferred,
    /// Materializes (and usually sorts) the whole input first
    ImmediateArray,
    /// Renames output groups only
    Rename,
}

/// Static description of one function
#[derive(Debug)]
pub struct FunctionSpec {
    /// Function kind
    pub kind: SeriesFunction,
    /// Canonical name used in display names
    pub name: &'static str,
    /// Accepted synonyms
    pub aliases: &'static [&'static str],
    /// Parameters that must precede the target expression
    pub required: usize,
    /// Parameters that may follow the required ones
    pub optional: usize,
    /// Output cardinality
    pub returns: ReturnType,
    /// Input consumption mode
    pub mode: ExecutionMode,
}

macro_rules! function {
    ($kind:ident, [$($alias:literal),*], $req:literal, $opt:literal, $ret:ident, $mode:ident) => {
        FunctionSpec {
            kind: SeriesFunction::$kind,
            name: stringify!($kind),
            aliases: &[$($alias),*],
            required: $req,
            optional: $opt,
            returns: ReturnType::$ret,
            mode: ExecutionMode::$mode,
        }
    };
}

/// The function table, in `SeriesFunction` declaration order
pub static FUNCTIONS: [FunctionSpec; 36] = [
    function!(Average, ["Avg", "Mean"], 0, 0, Scalar, ImmediateScalar),
    function!(Minimum, ["Min"], 0, 0, Scalar, ImmediateScalar),
    function!(Maximum, ["Max"], 0, 0, Scalar, ImmediateScalar),
    function!(Total, ["Sum"], 0, 0, Scalar, ImmediateScalar),
    function!(Range, [], 0, 0, Scalar, ImmediateScalar),
    function!(Count, [], 0, 0, Scalar, ImmediateScalar),
    function!(Distinct, ["Unique"], 0, 0, Series, ImmediateArray),
    function!(AbsoluteValue, ["Abs"], 0, 0, Series, Deferred),
    function!(Add, [], 1, 0, Series, Deferred),
    function!(Subtract, ["Sub"], 1, 0, Series, Deferred),
    function!(Multiply, ["Mul"], 1, 0, Series, Deferred),
    function!(Divide, ["Div"], 1, 0, Series, Deferred),
    function!(Round, [], 0, 1, Series, Deferred),
    function!(Floor, [], 0, 0, Series, Deferred),
    function!(Ceiling, ["Ceil"], 0, 0, Series, Deferred),
    function!(Truncate, ["Trunc"], 0, 0, Series, Deferred),
    function!(StandardDeviation, ["StdDev"], 0, 1, Scalar, ImmediateArray),
    function!(Median, ["Med", "Mid"], 0, 0, Scalar, ImmediateArray),
    function!(Mode, [], 0, 0, Scalar, ImmediateArray),
    function!(Top, ["Largest"], 1, 1, Series, ImmediateArray),
    function!(Bottom, ["Bot", "Smallest"], 1, 1, Series, ImmediateArray),
    function!(Random, ["Rand", "Sample"], 1, 1, Series, ImmediateArray),
    function!(First, [], 0, 1, Series, ImmediateArray),
    function!(Last, [], 0, 1, Series, ImmediateArray),
    function!(Percentile, ["Pctl"], 1, 0, Scalar, ImmediateArray),
    function!(Difference, ["Diff"], 0, 0, Series, Deferred),
    function!(TimeDifference, ["TimeDiff", "Elapsed"], 0, 1, Series, Deferred),
    function!(Derivative, ["Der"], 0, 1, Series, Deferred),
    function!(TimeIntegration, ["TimeInt"], 0, 1, Scalar, ImmediateScalar),
    function!(Interval, [], 1, 1, Series, Deferred),
    function!(IncludeRange, ["Include"], 2, 2, Series, Deferred),
    function!(ExcludeRange, ["Exclude"], 2, 2, Series, Deferred),
    function!(FilterNaN, [], 0, 1, Series, Deferred),
    function!(UnwrapAngle, ["Unwrap"], 0, 1, Series, ImmediateArray),
    function!(WrapAngle, ["Wrap"], 0, 1, Series, Deferred),
    function!(Label, ["Name"], 1, 0, Series, Rename),
];

lazy_static! {
    /// Lower-cased name and synonym index
    static ref FUNCTION_NAMES: HashMap<String, SeriesFunction> = {
        let mut names = HashMap::new();
        for spec in FUNCTIONS.iter() {
            names.insert(spec.name.to_ascii_lowercase(), spec.kind);
            for alias in spec.aliases {
                names.insert(alias.to_ascii_lowercase(), spec.kind);
            }
        }
        names
    };
}

impl SeriesFunction {
    /// Static description for this function
    pub fn spec(&self) -> &'static FunctionSpec {
        &FUNCTIONS[*self as usize]
    }

    /// Canonical name
    pub fn name(&self) -> &'static str {
        self.spec().name
    }

    /// Look up a bare function name or synonym (no group prefix)
    pub fn lookup(name: &str) -> Option<SeriesFunction> {
        FUNCTION_NAMES.get(&name.trim().to_ascii_lowercase()).copied()
    }

    /// Resolve a call name that may carry a `Set` or `Slice` prefix
    ///
    /// Bare names take priority, so a function whose own name begins with
    /// a prefix is never split.
    pub fn resolve_call(name: &str) -> Option<(GroupOperation, SeriesFunction)> {
        if let Some(kind) = Self::lookup(name) {
            return Some((GroupOperation::None, kind));
        }

        let lower = name.trim().to_ascii_lowercase();
        for (prefix, operation) in [("slice", GroupOperation::Slice), ("set", GroupOperation::Set)] {
            if let Some(rest) = lower.strip_prefix(prefix) {
                if let Some(kind) = Self::lookup(rest) {
                    return Some((operation, kind));
                }
            }
        }

        None
    }

    /// True when the function reduces its input to a single sample
    pub fn is_scalar(&self) -> bool {
        self.spec().returns == ReturnType::Scalar
    }

    /// Functions whose Set result is one of the input samples
    pub fn returns_representative(&self) -> bool {
        matches!(
            self,
            SeriesFunction::Minimum | SeriesFunction::Maximum | SeriesFunction::Median
        )
    }
}

impl fmt::Display for SeriesFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_order_matches_enum() {
        for (i, spec) in FUNCTIONS.iter().enumerate() {
            assert_eq!(spec.kind as usize, i, "{} out of order", spec.name);
        }
    }

    #[test]
    fn test_synonyms_resolve() {
        assert_eq!(SeriesFunction::lookup("avg"), Some(SeriesFunction::Average));
        assert_eq!(SeriesFunction::lookup("MEAN"), Some(SeriesFunction::Average));
        assert_eq!(SeriesFunction::lookup("Elapsed"), Some(SeriesFunction::TimeDifference));
        assert_eq!(SeriesFunction::lookup("smallest"), Some(SeriesFunction::Bottom));
        assert_eq!(SeriesFunction::lookup("Name"), Some(SeriesFunction::Label));
        assert_eq!(SeriesFunction::lookup("Avrage"), None);
    }

    #[test]
    fn test_group_prefixes() {
        assert_eq!(
            SeriesFunction::resolve_call("SetAverage"),
            Some((GroupOperation::Set, SeriesFunction::Average))
        );
        assert_eq!(
            SeriesFunction::resolve_call("sliceavg"),
            Some((GroupOperation::Slice, SeriesFunction::Average))
        );
        assert_eq!(
            SeriesFunction::resolve_call("Sample"),
            Some((GroupOperation::None, SeriesFunction::Random))
        );
        assert_eq!(SeriesFunction::resolve_call("SetNothing"), None);
    }

    #[test]
    fn test_parameter_counts() {
        let include = SeriesFunction::IncludeRange.spec();
        assert_eq!((include.required, include.optional), (2, 2));
        let label = SeriesFunction::Label.spec();
        assert_eq!((label.required, label.optional), (1, 0));
        let round = SeriesFunction::Round.spec();
        assert_eq!((round.required, round.optional), (0, 1));
        assert!(SeriesFunction::Percentile.is_scalar());
        assert!(!SeriesFunction::Top.is_scalar());
    }
}
