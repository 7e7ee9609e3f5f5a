//! Time and angle unit conversions
//!
//! Pure value conversions used by function parameters such as
//! `TimeDifference(Minutes, ...)` or `UnwrapAngle(Radians, ...)`.
//! Sample times are milliseconds, so time conversions go through seconds.

use crate::query::error::{QueryError, QueryResult};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Time Units
// ============================================================================

/// Supported time units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    /// SI second
    Seconds,
    /// 1e-9 seconds
    Nanoseconds,
    /// 1e-6 seconds
    Microseconds,
    /// 1e-3 seconds
    Milliseconds,
    /// 60 seconds
    Minutes,
    /// 3600 seconds
    Hours,
    /// 86400 seconds
    Days,
    /// 604800 seconds
    Weeks,
    /// Traditional Chinese unit, one hundredth of a day (864 seconds)
    Ke,
    /// 100 nanoseconds
    Ticks,
    /// Atomic unit of time (Hartree)
    AtomicUnitsOfTime,
    /// Planck time
    PlanckTime,
}

impl TimeUnit {
    /// All units, in display order
    pub const ALL: [TimeUnit; 12] = [
        TimeUnit::Seconds,
        TimeUnit::Nanoseconds,
        TimeUnit::Microseconds,
        TimeUnit::Milliseconds,
        TimeUnit::Minutes,
        TimeUnit::Hours,
        TimeUnit::Days,
        TimeUnit::Weeks,
        TimeUnit::Ke,
        TimeUnit::Ticks,
        TimeUnit::AtomicUnitsOfTime,
        TimeUnit::PlanckTime,
    ];

    /// Number of seconds in one of this unit
    pub fn seconds(&self) -> f64 {
        match self {
            TimeUnit::Seconds => 1.0,
            TimeUnit::Nanoseconds => 1e-9,
            TimeUnit::Microseconds => 1e-6,
            TimeUnit::Milliseconds => 1e-3,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Hours => 3600.0,
            TimeUnit::Days => 86_400.0,
            TimeUnit::Weeks => 604_800.0,
            TimeUnit::Ke => 864.0,
            TimeUnit::Ticks => 1e-7,
            TimeUnit::AtomicUnitsOfTime => 2.418_884_326_505e-17,
            TimeUnit::PlanckTime => 5.391_16e-44,
        }
    }

    /// Convert a millisecond span into this unit
    pub fn from_millis(&self, millis: f64) -> f64 {
        millis / 1000.0 / self.seconds()
    }

    /// Convert a value in this unit into milliseconds
    pub fn to_millis(&self, value: f64) -> f64 {
        value * self.seconds() * 1000.0
    }

    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            TimeUnit::Seconds => "Seconds",
            TimeUnit::Nanoseconds => "Nanoseconds",
            TimeUnit::Microseconds => "Microseconds",
            TimeUnit::Milliseconds => "Milliseconds",
            TimeUnit::Minutes => "Minutes",
            TimeUnit::Hours => "Hours",
            TimeUnit::Days => "Days",
            TimeUnit::Weeks => "Weeks",
            TimeUnit::Ke => "Ke",
            TimeUnit::Ticks => "Ticks",
            TimeUnit::AtomicUnitsOfTime => "AtomicUnitsOfTime",
            TimeUnit::PlanckTime => "PlanckTime",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TimeUnit {
    type Err = QueryError;

    fn from_str(s: &str) -> QueryResult<Self> {
        let unit = match s.trim().to_ascii_lowercase().as_str() {
            "seconds" | "second" | "secs" | "sec" | "s" => TimeUnit::Seconds,
            "nanoseconds" | "nanosecond" | "ns" => TimeUnit::Nanoseconds,
            "microseconds" | "microsecond" | "us" | "µs" => TimeUnit::Microseconds,
            "milliseconds" | "millisecond" | "ms" => TimeUnit::Milliseconds,
            "minutes" | "minute" | "mins" | "min" => TimeUnit::Minutes,
            "hours" | "hour" | "h" => TimeUnit::Hours,
            "days" | "day" | "d" => TimeUnit::Days,
            "weeks" | "week" | "w" => TimeUnit::Weeks,
            "ke" => TimeUnit::Ke,
            "ticks" | "tick" => TimeUnit::Ticks,
            "atomicunitsoftime" | "atomicunitoftime" | "au" => TimeUnit::AtomicUnitsOfTime,
            "plancktime" | "tp" => TimeUnit::PlanckTime,
            _ => {
                return Err(QueryError::format(format!(
                    "'{}' is not a recognized time unit",
                    s.trim()
                )))
            }
        };
        Ok(unit)
    }
}

// ============================================================================
// Angle Units
// ============================================================================

/// Supported angle units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AngleUnit {
    /// Radians
    Radians,
    /// 360 per circle
    Degrees,
    /// 400 per circle
    Grads,
    /// 21600 per circle
    ArcMinutes,
    /// 1296000 per circle
    ArcSeconds,
    /// 6400 per circle (NATO mil)
    AngularMil,
}

impl AngleUnit {
    /// Size of a full circle in this unit
    pub fn full_circle(&self) -> f64 {
        match self {
            AngleUnit::Radians => 2.0 * PI,
            AngleUnit::Degrees => 360.0,
            AngleUnit::Grads => 400.0,
            AngleUnit::ArcMinutes => 21_600.0,
            AngleUnit::ArcSeconds => 1_296_000.0,
            AngleUnit::AngularMil => 6400.0,
        }
    }

    /// Convert a value in this unit to radians
    pub fn to_radians(&self, value: f64) -> f64 {
        value * 2.0 * PI / self.full_circle()
    }

    /// Convert radians to this unit
    pub fn from_radians(&self, radians: f64) -> f64 {
        radians * self.full_circle() / (2.0 * PI)
    }

    /// Canonical name
    pub fn name(&self) -> &'static str {
        match self {
            AngleUnit::Radians => "Radians",
            AngleUnit::Degrees => "Degrees",
            AngleUnit::Grads => "Grads",
            AngleUnit::ArcMinutes => "ArcMinutes",
            AngleUnit::ArcSeconds => "ArcSeconds",
            AngleUnit::AngularMil => "AngularMil",
        }
    }
}

impl fmt::Display for AngleUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AngleUnit {
    type Err = QueryError;

    fn from_str(s: &str) -> QueryResult<Self> {
        let unit = match s.trim().to_ascii_lowercase().as_str() {
            "radians" | "radian" | "rad" => AngleUnit::Radians,
            "degrees" | "degree" | "deg" => AngleUnit::Degrees,
            "grads" | "grad" | "gradians" | "gon" => AngleUnit::Grads,
            "arcminutes" | "arcminute" | "arcmin" => AngleUnit::ArcMinutes,
            "arcseconds" | "arcsecond" | "arcsec" => AngleUnit::ArcSeconds,
            "angularmil" | "angularmils" | "mil" | "mils" => AngleUnit::AngularMil,
            _ => {
                return Err(QueryError::format(format!(
                    "'{}' is not a recognized angle unit",
                    s.trim()
                )))
            }
        };
        Ok(unit)
    }
}

// ============================================================================
// Angle helpers
// ============================================================================

/// Wrap an angle into (-half circle, +half circle] of the given unit
pub fn wrap_angle(value: f64, unit: AngleUnit) -> f64 {
    let full = unit.full_circle();
    let half = full / 2.0;
    let wrapped = value - full * ((value + half) / full).floor();
    // floor() maps +half to -half; keep the closed upper bound
    if wrapped == -half {
        half
    } else {
        wrapped
    }
}

/// Remove discontinuities larger than half a circle from a phase sequence
///
/// Each jump between consecutive values is replaced by its wrapped
/// equivalent, so the output is continuous.
pub fn unwrap_angles(values: &[f64], unit: AngleUnit) -> Vec<f64> {
    let mut unwrapped = Vec::with_capacity(values.len());
    let mut offset = 0.0;
    let full = unit.full_circle();
    let half = full / 2.0;

    for (i, &value) in values.iter().enumerate() {
        if i > 0 {
            let delta = value - values[i - 1];
            if delta > half {
                offset -= full * ((delta + half) / full).floor();
            } else if delta < -half {
                offset += full * ((-delta + half) / full).floor();
            }
        }
        unwrapped.push(value + offset);
    }

    unwrapped
}
