//! Function parameter parsing
//!
//! Numeric parameters are literal numbers or the name of a target whose
//! first sample in the current source supplies the value. A named
//! parameter may carry a fallback as `name;default`; inside a slice a
//! missing target silently takes its fallback.

use super::EvalContext;
use crate::query::error::{QueryError, QueryResult};
use crate::types::SeriesSample;
use crate::units::{AngleUnit, TimeUnit};

/// Parse a literal float
pub fn parse_number(text: &str) -> QueryResult<f64> {
    let text = text.trim();
    text.parse::<f64>().map_err(|_| {
        QueryError::format(format!("Could not parse '{}' as a floating-point value", text))
    })
}

/// Parse a numeric parameter, resolving named targets against `samples`
pub fn parse_float<I>(
    parameter: &str,
    samples: I,
    ctx: &EvalContext<'_>,
    require_non_negative: bool,
) -> QueryResult<f64>
where
    I: Iterator<Item = SeriesSample>,
{
    let parameter = parameter.trim();
    let value = match parameter.parse::<f64>() {
        Ok(value) => value,
        Err(_) => named_value(parameter, samples, ctx, 0.0)?,
    };

    if require_non_negative && value < 0.0 {
        return Err(QueryError::out_of_range(format!(
            "Value '{}' is less than zero",
            parameter
        )));
    }
    Ok(value)
}

/// Parse a sample count against `values`
///
/// Accepts an integer, `N%` of the input length (minimum 1), a fraction
/// strictly between 0 and 1 of the input length, or a named target.
/// Returns 0 for empty input.
pub fn parse_count(parameter: &str, values: &[SeriesSample], ctx: &EvalContext<'_>) -> QueryResult<usize> {
    let length = values.len();
    if length == 0 {
        return Ok(0);
    }

    let parameter = parameter.trim();
    if parameter.ends_with('%') {
        let percent = parse_percentage(parameter, false)?;
        let count = (length as f64 * (percent / 100.0)) as usize;
        return Ok(count.max(1));
    }

    let value = match parameter.parse::<f64>() {
        Ok(value) => value,
        Err(_) => named_value(parameter, values.iter().cloned(), ctx, 1.0)?,
    };

    let count = if value > 0.0 && value < 1.0 {
        (length as f64 * value) as i64
    } else {
        value as i64
    };

    if count < 1 {
        return Err(QueryError::out_of_range(format!(
            "Count '{}' is less than one",
            parameter
        )));
    }
    Ok(count as usize)
}

/// Parse a percentage, optionally suffixed with `%`
///
/// The accepted range is `[0, 100]`, or `(0, 100]` without `include_zero`.
pub fn parse_percentage(parameter: &str, include_zero: bool) -> QueryResult<f64> {
    let text = parameter.trim();
    let text = text.strip_suffix('%').unwrap_or(text).trim();
    let percent = parse_number(text)?;

    let in_range = if include_zero {
        (0.0..=100.0).contains(&percent)
    } else {
        percent > 0.0 && percent <= 100.0
    };
    if !in_range {
        return Err(QueryError::out_of_range(format!(
            "Percentage '{}' is outside range of {} to 100",
            text,
            if include_zero { "0" } else { "greater than 0" }
        )));
    }
    Ok(percent)
}

/// Parse a non-negative integer
pub fn parse_int(parameter: &str) -> QueryResult<i32> {
    let text = parameter.trim();
    let value: i32 = text.parse().map_err(|_| {
        QueryError::format(format!("Could not parse '{}' as an integer value", text))
    })?;
    if value < 0 {
        return Err(QueryError::out_of_range(format!(
            "Value '{}' is less than zero",
            text
        )));
    }
    Ok(value)
}

/// Parse a boolean flag: `true/false`, `1/0`, `yes/no`
pub fn parse_bool(parameter: &str) -> QueryResult<bool> {
    match parameter.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "t" | "on" => Ok(true),
        "false" | "0" | "no" | "n" | "f" | "off" => Ok(false),
        other => Err(QueryError::format(format!(
            "Could not parse '{}' as a boolean value",
            other
        ))),
    }
}

/// Optional boolean at `index`, `default` when absent
pub fn bool_at(parameters: &[String], index: usize, default: bool) -> QueryResult<bool> {
    parameters
        .get(index)
        .map(|p| parse_bool(p))
        .transpose()
        .map(|flag| flag.unwrap_or(default))
}

/// Optional time unit at `index`, `default` when absent
pub fn time_unit_at(parameters: &[String], index: usize, default: TimeUnit) -> QueryResult<TimeUnit> {
    parameters
        .get(index)
        .map(|p| p.parse::<TimeUnit>())
        .transpose()
        .map(|unit| unit.unwrap_or(default))
}

/// Optional angle unit at `index`, `default` when absent
pub fn angle_unit_at(parameters: &[String], index: usize, default: AngleUnit) -> QueryResult<AngleUnit> {
    parameters
        .get(index)
        .map(|p| p.parse::<AngleUnit>())
        .transpose()
        .map(|unit| unit.unwrap_or(default))
}

fn named_value<I>(parameter: &str, samples: I, ctx: &EvalContext<'_>, slice_fallback: f64) -> QueryResult<f64>
where
    I: Iterator<Item = SeriesSample>,
{
    let (name, default) = match parameter.split_once(';') {
        Some((name, default)) => (name.trim(), Some(parse_number(default)?)),
        None => (parameter, None),
    };

    if let Some(value) = ctx.target_value(samples, name) {
        return Ok(value);
    }

    match default {
        Some(value) => Ok(value),
        None if ctx.is_slice() => Ok(slice_fallback),
        None => Err(QueryError::unresolved_parameter(name)),
    }
}
