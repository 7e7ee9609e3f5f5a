//! FILTER and SELECT metadata clause parser
//!
//! # Supported Syntax
//!
//! ```text
//! FILTER [TOP n] <table> WHERE <predicate> [ORDER BY <field> [ASC|DESC]] [TOP n]
//! SELECT [TOP n] <fields> FROM <table> WHERE <predicate> [ORDER BY <field> [ASC|DESC]]
//! ```
//!
//! The predicate is kept as text and handed to the metadata catalog.

use super::split::find_keyword;
use crate::query::error::{QueryError, QueryResult};
use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{digit1, multispace0, multispace1},
    combinator::{map_res, opt, value},
    sequence::preceded,
    IResult, Parser,
};

/// Parsed metadata selection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterClause {
    /// Catalog table to select from
    pub table: String,
    /// Row predicate text
    pub predicate: String,
    /// Optional sort field
    pub order_by: Option<String>,
    /// Sort descending
    pub descending: bool,
    /// Maximum rows to take
    pub take: Option<usize>,
}

/// Parse a FILTER or SELECT clause
///
/// Returns `None` when `text` does not start with either keyword, so the
/// caller can try other target forms.
pub fn parse_filter_clause(text: &str) -> Option<QueryResult<FilterClause>> {
    let text = text.trim();
    if starts_with_keyword(text, "FILTER") {
        Some(parse_filter(text))
    } else if starts_with_keyword(text, "SELECT") {
        Some(parse_select(text))
    } else {
        None
    }
}

fn starts_with_keyword(text: &str, keyword: &str) -> bool {
    text.len() > keyword.len()
        && text.is_char_boundary(keyword.len())
        && text[..keyword.len()].eq_ignore_ascii_case(keyword)
        && text.as_bytes()[keyword.len()].is_ascii_whitespace()
}

// ============================================================================
// Clause heads
// ============================================================================

fn parse_filter(text: &str) -> QueryResult<FilterClause> {
    let (rest, (take, table)) = filter_head(text).map_err(|e| {
        QueryError::parse(format!("Malformed FILTER expression \"{}\": {:?}", text, e))
    })?;

    build_clause(table, rest, take, text)
}

fn filter_head(input: &str) -> IResult<&str, (Option<usize>, &str)> {
    let (input, _) = (tag_no_case("FILTER"), multispace1).parse(input)?;
    let (input, take) = opt(top_clause).parse(input)?;
    let (input, table) = identifier(input)?;
    let (input, _) = (multispace1, tag_no_case("WHERE"), multispace1).parse(input)?;
    Ok((input, (take, table)))
}

fn parse_select(text: &str) -> QueryResult<FilterClause> {
    let malformed = || QueryError::parse(format!("Malformed SELECT expression \"{}\"", text));

    let (rest, take) = (tag_no_case("SELECT"), multispace1, opt(top_clause))
        .map(|(_, _, take)| take)
        .parse(text)
        .map_err(|_: nom::Err<nom::error::Error<&str>>| malformed())?;

    // Field list is informational only
    let from = find_keyword(rest, "FROM").ok_or_else(malformed)?;
    let after_from = &rest[from..];

    let (rest, table) = (tag_no_case("FROM"), multispace1, identifier)
        .map(|(_, _, table)| table)
        .parse(after_from)
        .map_err(|_: nom::Err<nom::error::Error<&str>>| malformed())?;
    let (rest, _) = (multispace1, tag_no_case("WHERE"), multispace1)
        .parse(rest)
        .map_err(|_: nom::Err<nom::error::Error<&str>>| malformed())?;

    build_clause(table, rest, take, text)
}

// ============================================================================
// Clause tail: predicate, ORDER BY, trailing TOP
// ============================================================================

fn build_clause(
    table: &str,
    tail: &str,
    head_take: Option<usize>,
    text: &str,
) -> QueryResult<FilterClause> {
    let (tail, trailing_take) = split_trailing_top(tail);

    let (predicate, order) = match find_keyword(tail, "ORDER BY") {
        Some(pos) => {
            let (_, (field, descending)) = order_clause(&tail[pos..]).map_err(|e| {
                QueryError::parse(format!("Malformed ORDER BY in \"{}\": {:?}", text, e))
            })?;
            (&tail[..pos], Some((field.to_string(), descending)))
        }
        None => (tail, None),
    };

    let predicate = predicate.trim();
    if predicate.is_empty() {
        return Err(QueryError::parse(format!(
            "Missing WHERE predicate in \"{}\"",
            text
        )));
    }

    let (order_by, descending) = match order {
        Some((field, descending)) => (Some(field), descending),
        None => (None, false),
    };

    Ok(FilterClause {
        table: table.to_string(),
        predicate: predicate.to_string(),
        order_by,
        descending,
        take: trailing_take.or(head_take),
    })
}

/// Split a `TOP n` suffix off the end of the clause
fn split_trailing_top(tail: &str) -> (&str, Option<usize>) {
    let trimmed = tail.trim_end();
    let mut search_from = 0;
    while let Some(offset) = find_keyword(&trimmed[search_from..], "TOP") {
        let pos = search_from + offset;
        if let Ok(("", take)) = top_clause(&trimmed[pos..]) {
            return (&trimmed[..pos], Some(take));
        }
        search_from = pos + 3;
    }
    (trimmed, None)
}

fn order_clause(input: &str) -> IResult<&str, (&str, bool)> {
    let (input, _) = (
        tag_no_case("ORDER"),
        multispace1,
        tag_no_case("BY"),
        multispace1,
    )
        .parse(input)?;
    let (input, field) = identifier(input)?;
    let (input, descending) = opt(preceded(
        multispace1,
        alt((
            value(true, tag_no_case("DESC")),
            value(false, tag_no_case("ASC")),
        )),
    ))
    .parse(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, (field, descending.unwrap_or(false))))
}

/// `TOP n` followed by optional whitespace
fn top_clause(input: &str) -> IResult<&str, usize> {
    let (input, _) = (tag_no_case("TOP"), multispace1).parse(input)?;
    let (input, take) = map_res(digit1, |d: &str| d.parse::<usize>()).parse(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, take))
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '.').parse(input)
}
