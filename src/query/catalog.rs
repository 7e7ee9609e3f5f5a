//! Metadata Catalog
//!
//! Read-only tabular view of series metadata (point tags, signal types,
//! device associations). The engine uses it to expand FILTER expressions,
//! map tags and GUIDs to series keys, and render labels.
//!
//! [`InMemoryCatalog`] is a complete implementation over rows held in
//! memory, including a small predicate language:
//!
//! ```text
//! SignalType = 'FREQ' AND (Device LIKE 'SHELBY%' OR ID IN ('PPA:1', 'PPA:2'))
//! NOT Enabled = 0
//! Description IS NOT NULL
//! ```

use crate::query::error::{QueryError, QueryResult};
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{map, opt, recognize, value},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded},
    IResult, Parser,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

// ============================================================================
// Rows
// ============================================================================

/// One catalog row: named string fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataRow(BTreeMap<String, String>);

impl MetadataRow {
    /// Empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Field value, matching the field name case-insensitively
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0
            .get(field)
            .or_else(|| {
                self.0
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(field))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }

    /// Iterate `(field, value)` pairs
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MetadataRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ============================================================================
// Catalog contract
// ============================================================================

/// Read-only metadata lookup
pub trait MetadataCatalog: Send + Sync {
    /// True when the catalog has a table with this name (case-insensitive)
    fn has_table(&self, table: &str) -> bool;

    /// Rows of `table` matching `predicate`, optionally sorted and truncated
    fn select_rows(
        &self,
        table: &str,
        predicate: &str,
        sort_field: Option<&str>,
        descending: bool,
        take: Option<usize>,
    ) -> QueryResult<Vec<MetadataRow>>;

    /// First row of `table` matching `predicate`
    fn lookup_row(&self, table: &str, predicate: &str) -> QueryResult<Option<MetadataRow>> {
        Ok(self
            .select_rows(table, predicate, None, false, Some(1))?
            .into_iter()
            .next())
    }
}

/// Build an equality predicate with the value safely quoted
pub fn equals_predicate(field: &str, value: &str) -> String {
    format!("{} = '{}'", field, value.replace('\'', "''"))
}

// ============================================================================
// In-memory catalog
// ============================================================================

/// Catalog over rows held in memory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InMemoryCatalog {
    tables: HashMap<String, Vec<MetadataRow>>,
}

impl InMemoryCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row to a table, creating it on first use
    pub fn add_row(&mut self, table: &str, row: MetadataRow) {
        let key = self
            .table_key(table)
            .unwrap_or_else(|| table.to_string());
        self.tables.entry(key).or_default().push(row);
    }

    /// Builder-style [`add_row`](Self::add_row)
    pub fn with_row(mut self, table: &str, row: MetadataRow) -> Self {
        self.add_row(table, row);
        self
    }

    /// Number of rows in a table
    pub fn row_count(&self, table: &str) -> usize {
        self.rows(table).map_or(0, Vec::len)
    }

    fn table_key(&self, table: &str) -> Option<String> {
        self.tables
            .keys()
            .find(|name| name.eq_ignore_ascii_case(table))
            .cloned()
    }

    fn rows(&self, table: &str) -> Option<&Vec<MetadataRow>> {
        self.table_key(table).and_then(|key| self.tables.get(&key))
    }
}

impl MetadataCatalog for InMemoryCatalog {
    fn has_table(&self, table: &str) -> bool {
        self.table_key(table).is_some()
    }

    fn select_rows(
        &self,
        table: &str,
        predicate: &str,
        sort_field: Option<&str>,
        descending: bool,
        take: Option<usize>,
    ) -> QueryResult<Vec<MetadataRow>> {
        let rows = self
            .rows(table)
            .ok_or_else(|| QueryError::resolution(format!("Unknown metadata table '{}'", table)))?;
        let predicate = Predicate::parse(predicate)?;

        let mut selected: Vec<MetadataRow> = rows
            .iter()
            .filter(|row| predicate.evaluate(row))
            .cloned()
            .collect();

        if let Some(field) = sort_field {
            selected.sort_by(|a, b| {
                let ordering = compare_values(a.get(field), b.get(field));
                if descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        if let Some(take) = take {
            selected.truncate(take);
        }

        Ok(selected)
    }
}

// ============================================================================
// Predicate language
// ============================================================================

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>` or `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

/// Parsed row predicate
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Matches every row
    True,
    /// `field <op> literal`
    Compare(String, CompareOp, String),
    /// `field LIKE 'pattern'`
    Like(String, Regex),
    /// `field IN (...)`
    In(String, Vec<String>),
    /// `field IS NULL`
    IsNull(String),
    /// Negation
    Not(Box<Predicate>),
    /// Conjunction
    And(Box<Predicate>, Box<Predicate>),
    /// Disjunction
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    /// Parse predicate text; empty text matches everything
    pub fn parse(text: &str) -> QueryResult<Self> {
        let text = text.trim();
        if text.is_empty() || text == "1=1" || text.eq_ignore_ascii_case("true") {
            return Ok(Predicate::True);
        }

        match delimited(multispace0, or_expr, multispace0).parse(text) {
            Ok(("", predicate)) => Ok(predicate),
            Ok((rest, _)) => Err(QueryError::parse(format!(
                "Unexpected text '{}' in predicate \"{}\"",
                rest, text
            ))),
            Err(e) => Err(QueryError::parse(format!(
                "Malformed predicate \"{}\": {:?}",
                text, e
            ))),
        }
    }

    /// Evaluate against one row
    pub fn evaluate(&self, row: &MetadataRow) -> bool {
        match self {
            Predicate::True => true,
            Predicate::Compare(field, op, literal) => match row.get(field) {
                Some(value) => {
                    let ordering = compare_values(Some(value), Some(literal));
                    match op {
                        CompareOp::Eq => ordering == Ordering::Equal,
                        CompareOp::NotEq => ordering != Ordering::Equal,
                        CompareOp::Lt => ordering == Ordering::Less,
                        CompareOp::LtEq => ordering != Ordering::Greater,
                        CompareOp::Gt => ordering == Ordering::Greater,
                        CompareOp::GtEq => ordering != Ordering::Less,
                    }
                }
                None => false,
            },
            Predicate::Like(field, pattern) => row.get(field).is_some_and(|v| pattern.is_match(v)),
            Predicate::In(field, values) => row.get(field).is_some_and(|v| {
                values
                    .iter()
                    .any(|candidate| compare_values(Some(v), Some(candidate)) == Ordering::Equal)
            }),
            Predicate::IsNull(field) => row.get(field).map_or(true, str::is_empty),
            Predicate::Not(inner) => !inner.evaluate(row),
            Predicate::And(a, b) => a.evaluate(row) && b.evaluate(row),
            Predicate::Or(a, b) => a.evaluate(row) || b.evaluate(row),
        }
    }
}

/// Numeric comparison when both sides are numbers, otherwise
/// case-insensitive text comparison; missing values sort first
fn compare_values(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
            (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => a.to_lowercase().cmp(&b.to_lowercase()),
        },
    }
}

/// Translate a SQL LIKE pattern into an anchored case-insensitive regex
fn like_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expr = String::from("(?is)^");
    for c in pattern.chars() {
        match c {
            '%' => expr.push_str(".*"),
            '_' => expr.push('.'),
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr)
}

fn or_expr(input: &str) -> IResult<&str, Predicate> {
    let (input, first) = and_expr(input)?;
    let (input, rest) =
        many0(preceded((multispace1, tag_no_case("OR"), multispace1), and_expr)).parse(input)?;
    let predicate = rest
        .into_iter()
        .fold(first, |acc, p| Predicate::Or(Box::new(acc), Box::new(p)));
    Ok((input, predicate))
}

fn and_expr(input: &str) -> IResult<&str, Predicate> {
    let (input, first) = not_expr(input)?;
    let (input, rest) =
        many0(preceded((multispace1, tag_no_case("AND"), multispace1), not_expr)).parse(input)?;
    let predicate = rest
        .into_iter()
        .fold(first, |acc, p| Predicate::And(Box::new(acc), Box::new(p)));
    Ok((input, predicate))
}

fn not_expr(input: &str) -> IResult<&str, Predicate> {
    alt((
        map(preceded((tag_no_case("NOT"), multispace1), not_expr), |p| {
            Predicate::Not(Box::new(p))
        }),
        primary,
    ))
    .parse(input)
}

fn primary(input: &str) -> IResult<&str, Predicate> {
    alt((
        delimited(
            (char('('), multispace0),
            or_expr,
            (multispace0, char(')')),
        ),
        is_null,
        in_list,
        like,
        comparison,
    ))
    .parse(input)
}

fn is_null(input: &str) -> IResult<&str, Predicate> {
    let (input, field) = field_name(input)?;
    let (input, _) = (multispace1, tag_no_case("IS"), multispace1).parse(input)?;
    let (input, negated) = opt((tag_no_case("NOT"), multispace1)).parse(input)?;
    let (input, _) = tag_no_case("NULL").parse(input)?;
    let predicate = Predicate::IsNull(field.to_string());
    Ok((
        input,
        if negated.is_some() {
            Predicate::Not(Box::new(predicate))
        } else {
            predicate
        },
    ))
}

fn in_list(input: &str) -> IResult<&str, Predicate> {
    let (input, field) = field_name(input)?;
    let (input, negated) = opt((multispace1, tag_no_case("NOT"))).parse(input)?;
    let (input, _) = (multispace1, tag_no_case("IN"), multispace0).parse(input)?;
    let (input, values) = delimited(
        (char('('), multispace0),
        separated_list1((multispace0, char(','), multispace0), literal),
        (multispace0, char(')')),
    )
    .parse(input)?;
    let predicate = Predicate::In(field.to_string(), values);
    Ok((
        input,
        if negated.is_some() {
            Predicate::Not(Box::new(predicate))
        } else {
            predicate
        },
    ))
}

fn like(input: &str) -> IResult<&str, Predicate> {
    let (input, field) = field_name(input)?;
    let (input, negated) = opt((multispace1, tag_no_case("NOT"))).parse(input)?;
    let (input, _) = (multispace1, tag_no_case("LIKE"), multispace1).parse(input)?;
    let (rest, pattern) = literal(input)?;
    let regex = like_to_regex(&pattern).map_err(|_| {
        nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Verify))
    })?;
    let predicate = Predicate::Like(field.to_string(), regex);
    Ok((
        rest,
        if negated.is_some() {
            Predicate::Not(Box::new(predicate))
        } else {
            predicate
        },
    ))
}

fn comparison(input: &str) -> IResult<&str, Predicate> {
    let (input, field) = field_name(input)?;
    let (input, _) = multispace0(input)?;
    let (input, op) = alt((
        value(CompareOp::NotEq, tag("<>")),
        value(CompareOp::NotEq, tag("!=")),
        value(CompareOp::LtEq, tag("<=")),
        value(CompareOp::GtEq, tag(">=")),
        value(CompareOp::Eq, tag("=")),
        value(CompareOp::Lt, tag("<")),
        value(CompareOp::Gt, tag(">")),
    ))
    .parse(input)?;
    let (input, _) = multispace0(input)?;
    let (input, value) = literal(input)?;
    Ok((input, Predicate::Compare(field.to_string(), op, value)))
}

/// Field name, optionally `[bracketed]`
fn field_name(input: &str) -> IResult<&str, &str> {
    alt((
        delimited(char('['), take_while1(|c: char| c != ']'), char(']')),
        take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '.'),
    ))
    .parse(input)
}

/// Quoted string (`''` escapes a quote), number, or bare word
fn literal(input: &str) -> IResult<&str, String> {
    alt((
        quoted_string,
        map(
            recognize(pair(
                opt(char('-')),
                take_while1(|c: char| c.is_alphanumeric() || matches!(c, '.' | '_' | ':' | '-')),
            )),
            String::from,
        ),
    ))
    .parse(input)
}

fn quoted_string(input: &str) -> IResult<&str, String> {
    let (input, _) = char('\'')(input)?;
    let mut text = String::new();
    let mut rest = input;
    loop {
        let (after, chunk) = take_while(|c: char| c != '\'')(rest)?;
        text.push_str(chunk);
        let (after, _) = char('\'')(after)?;
        if let Some(escaped) = after.strip_prefix('\'') {
            text.push('\'');
            rest = escaped;
        } else {
            return Ok((after, text));
        }
    }
}
