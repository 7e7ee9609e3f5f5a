//! Target Expression Parser
//!
//! Turns a target expression into its top-level function calls plus the
//! literal remainder. Nested calls are parsed on demand when the
//! orchestrator descends into a call's inner expression.
//!
//! # Syntax
//!
//! ```text
//! PPA:1; PPA:2                                  literal targets
//! FILTER ActiveMeasurements WHERE SignalType='FREQ'
//! Average(PPA:1; PPA:2)                         function call
//! SetAverage(FILTER ... WHERE ...)              grouped call
//! SliceMax(0.033, PPA:1; PPA:2)                 sliced call, tolerance first
//! Top(10%, true, PPA:1)                         required + optional parameters
//! Label('Phase {PointTag}', Average(PPA:1))     nested call
//! ```
//!
//! # Example
//!
//! ```rust
//! use kuba_expr::query::parser::parse_expression;
//!
//! let parsed = parse_expression("Average(Minimum(PPA:1; PPA:2))").unwrap();
//! assert_eq!(parsed.functions.len(), 1);
//! assert_eq!(parsed.functions[0].inner_expression, "Minimum(PPA:1; PPA:2)");
//! ```

pub mod filter;
pub mod modifiers;
pub mod scanner;
pub mod split;

pub use filter::{parse_filter_clause, FilterClause};
pub use modifiers::QueryModifiers;
pub use split::{split_targets, split_top_level, unquote};

use crate::cache::TargetCaches;
use crate::query::error::{QueryError, QueryResult};
use crate::query::functions::SeriesFunction;
use crate::types::GroupOperation;
use scanner::{remove_calls, scan_calls, CallMatch};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// One parsed function call
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFunction {
    /// Function called
    pub kind: SeriesFunction,
    /// `Set`/`Slice` prefix, `None` when absent
    pub group_operation: GroupOperation,
    /// Parameter texts, trimmed; a `Slice` tolerance comes first
    pub parameters: Vec<String>,
    /// Target expression the function is applied to
    pub inner_expression: String,
}

impl fmt::Display for ParsedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}(", self.group_operation.prefix(), self.kind)?;
        for parameter in &self.parameters {
            write!(f, "{}, ", parameter)?;
        }
        write!(f, "{})", self.inner_expression)
    }
}

/// Top-level calls of an expression plus its literal remainder
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedExpression {
    /// Calls in order of appearance
    pub functions: Vec<ParsedFunction>,
    /// Expression text with every call removed
    pub reduced_text: String,
}

/// Parse the top-level calls of `text`
pub fn parse_expression(text: &str) -> QueryResult<ParsedExpression> {
    let text = text.trim();
    let calls = scan_calls(text)?;

    let functions = calls
        .iter()
        .map(parse_call)
        .collect::<QueryResult<Vec<_>>>()?;

    Ok(ParsedExpression {
        reduced_text: remove_calls(text, &calls),
        functions,
    })
}

/// Parse with memoization through the shared expression cache
pub fn parse_cached(caches: &TargetCaches, text: &str) -> QueryResult<Arc<ParsedExpression>> {
    let key = text.trim().to_string();
    if let Some(parsed) = caches.expressions.get(&key) {
        return Ok(parsed);
    }

    debug!(expression = %key, "parsing target expression");
    let parsed = Arc::new(parse_expression(&key)?);
    caches.expressions.insert(key, Arc::clone(&parsed));
    Ok(parsed)
}

fn parse_call(call: &CallMatch) -> QueryResult<ParsedFunction> {
    let (parameters, inner_expression) = extract_parameters(call)?;
    Ok(ParsedFunction {
        kind: call.kind,
        group_operation: call.operation,
        parameters,
        inner_expression,
    })
}

/// Split a call body into parameters and the trailing target expression
///
/// Exactly the required count is taken first (one more for `Slice`, the
/// tolerance). Optional parameters are taken only while the candidate does
/// not look like the start of a target expression: no `FILTER` prefix and no
/// parenthesis. One field is always left for the target expression.
fn extract_parameters(call: &CallMatch) -> QueryResult<(Vec<String>, String)> {
    let spec = call.kind.spec();
    let fields = split_top_level(&call.inner, ',');
    let name = format!("{}{}", call.operation.prefix(), spec.name);

    let mut required = spec.required;
    if call.operation == GroupOperation::Slice {
        required += 1;
    }

    if fields.len() < required || (required > 0 && fields[..required].iter().any(String::is_empty))
    {
        let found = fields.iter().filter(|f| !f.is_empty()).count().min(required);
        return Err(QueryError::parameter_count(&name, found, required));
    }
    // The last field is always the target expression
    if fields.len() == required {
        return Err(QueryError::parameter_count(&name, required - 1, required));
    }

    let mut parameters: Vec<String> = fields[..required].to_vec();
    let mut next = required;

    for _ in 0..spec.optional {
        if next + 1 >= fields.len() {
            break;
        }
        let candidate = &fields[next];
        if looks_like_expression(candidate) {
            break;
        }
        parameters.push(candidate.clone());
        next += 1;
    }

    let inner_expression = fields[next..].join(", ");
    Ok((parameters, inner_expression))
}

fn looks_like_expression(field: &str) -> bool {
    let upper = field.trim_start().to_ascii_uppercase();
    upper.starts_with("FILTER") || upper.starts_with("SELECT ") || field.contains('(')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::error::QueryErrorKind;

    #[test]
    fn test_literal_only_expression() {
        let text = "PPA:1; PPA:2; FILTER ActiveMeasurements WHERE SignalType = 'FREQ'";
        let parsed = parse_expression(text).unwrap();
        assert!(parsed.functions.is_empty());
        assert_eq!(parsed.reduced_text, text);
    }

    #[test]
    fn test_nested_calls_parse_recursively() {
        let parsed = parse_expression("Average(Minimum(PPA:1; PPA:2))").unwrap();
        assert_eq!(parsed.functions.len(), 1);
        let outer = &parsed.functions[0];
        assert_eq!(outer.kind, SeriesFunction::Average);
        assert_eq!(outer.inner_expression, "Minimum(PPA:1; PPA:2)");
        assert!(parsed.reduced_text.is_empty());

        let inner = parse_expression(&outer.inner_expression).unwrap();
        assert_eq!(inner.functions.len(), 1);
        assert_eq!(inner.functions[0].kind, SeriesFunction::Minimum);
        assert_eq!(inner.functions[0].inner_expression, "PPA:1; PPA:2");
    }

    #[test]
    fn test_required_parameters() {
        let parsed = parse_expression("Add(-1.5, PPA:1)").unwrap();
        let add = &parsed.functions[0];
        assert_eq!(add.parameters, vec!["-1.5"]);
        assert_eq!(add.inner_expression, "PPA:1");

        let parsed = parse_expression("IncludeRange(59.95, 60.05, PPA:1)").unwrap();
        assert_eq!(parsed.functions[0].parameters, vec!["59.95", "60.05"]);
    }

    #[test]
    fn test_optional_parameters_do_not_swallow_target() {
        let parsed = parse_expression("Top(5, false, PPA:1)").unwrap();
        assert_eq!(parsed.functions[0].parameters, vec!["5", "false"]);

        let parsed = parse_expression("Top(5, PPA:1)").unwrap();
        assert_eq!(parsed.functions[0].parameters, vec!["5"]);
        assert_eq!(parsed.functions[0].inner_expression, "PPA:1");

        let parsed = parse_expression("Round(Average(PPA:1))").unwrap();
        assert!(parsed.functions[0].parameters.is_empty());

        let parsed =
            parse_expression("Round(FILTER ActiveMeasurements WHERE ID IN ('A', 'B'))").unwrap();
        assert!(parsed.functions[0].parameters.is_empty());
        assert_eq!(
            parsed.functions[0].inner_expression,
            "FILTER ActiveMeasurements WHERE ID IN ('A', 'B')"
        );
    }

    #[test]
    fn test_optional_parameter_stops_at_sub_expression() {
        let parsed = parse_expression("IncludeRange(1, 2, true, Max(PPA:1), PPA:2)").unwrap();
        let include = &parsed.functions[0];
        assert_eq!(include.parameters, vec!["1", "2", "true"]);
        assert_eq!(include.inner_expression, "Max(PPA:1), PPA:2");
    }

    #[test]
    fn test_slice_adds_tolerance_parameter() {
        let parsed = parse_expression("SliceAdd(0.5, 10, PPA:1; PPA:2)").unwrap();
        let add = &parsed.functions[0];
        assert_eq!(add.group_operation, GroupOperation::Slice);
        assert_eq!(add.parameters, vec!["0.5", "10"]);
        assert_eq!(add.inner_expression, "PPA:1; PPA:2");
    }

    #[test]
    fn test_parameter_count_mismatch() {
        let err = parse_expression("IncludeRange(5, PPA:1)").unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ParameterCountMismatch);
        assert_eq!(
            err.message,
            "Expected 2 parameters for IncludeRange, received 1"
        );

        let err = parse_expression("Percentile(PPA:1)").unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ParameterCountMismatch);
        assert_eq!(err.message, "Expected 1 parameter for Percentile, received 0");

        let err = parse_expression("SliceAverage(PPA:1)").unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ParameterCountMismatch);
        assert!(err.message.contains("SliceAverage"));

        let err = parse_expression("IncludeRange(5)").unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::ParameterCountMismatch);
        assert!(err.message.contains("IncludeRange"));
    }

    #[test]
    fn test_unknown_function() {
        let err = parse_expression("PPA:1; Avrage(PPA:2)").unwrap_err();
        assert_eq!(err.kind, QueryErrorKind::UnrecognizedFunction);
    }

    #[test]
    fn test_parse_cached_reuses_result() {
        let caches = TargetCaches::default();
        let a = parse_cached(&caches, "Max(PPA:1)").unwrap();
        let b = parse_cached(&caches, " Max(PPA:1) ").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(caches.expressions.len(), 1);
    }

    #[test]
    fn test_display() {
        let parsed = parse_expression("SetTop(5, true, PPA:1)").unwrap();
        assert_eq!(parsed.functions[0].to_string(), "SetTop(5, true, PPA:1)");
    }
}
