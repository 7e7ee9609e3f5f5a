//! Query modifier commands
//!
//! Commands are embedded in a target expression as `;Command` (or
//! `;Command={...}`), recognized case-insensitively and stripped before the
//! expression reaches the function parser.
//!
//! | Command | Effect |
//! |---|---|
//! | `DropEmptySeries` | omit output series without datapoints |
//! | `IncludePeaks` | ask the source for peaks, keep min/max when decimating |
//! | `FullResolutionQuery` / `FullResolutionData` | no interval hint, no decimation |
//! | `Imports={Field1, Field2}` | copy catalog fields into output metadata |
//! | `RadialDistribution={k=v; ...}` | copy settings into output metadata |

use super::split::split_top_level;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

lazy_static! {
    static ref DROP_EMPTY_SERIES: Regex =
        Regex::new(r"(?i)^DropEmptySeries$").expect("valid regex");
    static ref INCLUDE_PEAKS: Regex = Regex::new(r"(?i)^IncludePeaks$").expect("valid regex");
    static ref FULL_RESOLUTION: Regex =
        Regex::new(r"(?i)^FullResolution(Query|Data)$").expect("valid regex");
    static ref IMPORTS: Regex =
        Regex::new(r"(?i)^Imports\s*=\s*\{(.*)\}$").expect("valid regex");
    static ref RADIAL_DISTRIBUTION: Regex =
        Regex::new(r"(?i)^RadialDistribution\s*=\s*\{(.*)\}$").expect("valid regex");
}

/// Modifier commands found in one target expression
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryModifiers {
    /// Drop output series without samples
    pub drop_empty_series: bool,
    /// Preserve peaks when the source or the engine reduces resolution
    pub include_peaks: bool,
    /// Query at full resolution
    pub full_resolution: bool,
    /// Catalog fields to copy into output metadata
    pub imports: Vec<String>,
    /// Radial distribution settings
    pub radial_distribution: BTreeMap<String, String>,
}

impl QueryModifiers {
    /// Strip modifier commands from `expression`
    ///
    /// Only whole top-level `;` segments are commands; quoted text and call
    /// arguments are left alone. Returns the modifiers and the cleaned
    /// expression.
    pub fn extract(expression: &str) -> (Self, String) {
        let mut modifiers = Self::default();
        let mut kept: Vec<String> = Vec::new();
        let mut stripped = false;

        for segment in split_top_level(expression, ';') {
            if modifiers.apply(&segment) {
                stripped = true;
            } else if !segment.is_empty() {
                kept.push(segment);
            }
        }

        let text = if stripped {
            kept.join("; ")
        } else {
            expression.trim().trim_matches(';').trim().to_string()
        };
        (modifiers, text)
    }

    /// True when any command was present
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Record `segment` when it is a command
    fn apply(&mut self, segment: &str) -> bool {
        if DROP_EMPTY_SERIES.is_match(segment) {
            self.drop_empty_series = true;
        } else if INCLUDE_PEAKS.is_match(segment) {
            self.include_peaks = true;
        } else if FULL_RESOLUTION.is_match(segment) {
            self.full_resolution = true;
        } else if let Some(caps) = IMPORTS.captures(segment) {
            self.imports = caps[1]
                .split([',', ';'])
                .map(str::trim)
                .filter(|field| !field.is_empty())
                .map(String::from)
                .collect();
        } else if let Some(caps) = RADIAL_DISTRIBUTION.captures(segment) {
            self.radial_distribution = parse_settings(&caps[1]);
        } else {
            return false;
        }
        true
    }
}

/// Parse `key=value; key2=value2` (commas also accepted)
fn parse_settings(body: &str) -> BTreeMap<String, String> {
    body.split([';', ','])
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            (!key.is_empty()).then(|| (key.to_string(), value.trim().to_string()))
        })
        .collect()
}
