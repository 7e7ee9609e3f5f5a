//! Top-level function call scanner
//!
//! Walks an expression once, left to right, tracking single quotes and
//! parenthesis depth. A call is a word made of identifier characters
//! (optionally prefixed with `Set`/`Slice`) followed by `(`; its extent runs
//! to the matching `)`. Calls nested inside another call are left for the
//! recursive parse of that call's inner expression.
//!
//! Not treated as calls:
//! - anything inside a single-quoted literal
//! - boolean/set parentheticals: `IN (...)`, `AND (...)`, `OR (...)`, `NOT (...)`
//! - the remainder of a `FILTER ...` or `SELECT ...` clause up to the next `;`

use super::split::find_matching_paren;
use crate::query::error::{QueryError, QueryResult};
use crate::query::functions::SeriesFunction;
use crate::types::GroupOperation;

/// Words that may precede a parenthetical without being a function call
const PREDICATE_KEYWORDS: [&str; 5] = ["IN", "AND", "OR", "NOT", "EXISTS"];

/// Words that start a metadata clause
const CLAUSE_KEYWORDS: [&str; 2] = ["FILTER", "SELECT"];

/// One call found at nesting depth zero
#[derive(Debug, Clone, PartialEq)]
pub struct CallMatch {
    /// Byte offset of the call name
    pub start: usize,
    /// Byte offset one past the closing parenthesis
    pub end: usize,
    /// Grouping prefix of the call name
    pub operation: GroupOperation,
    /// Function called
    pub kind: SeriesFunction,
    /// Text between the parentheses
    pub inner: String,
}

/// Locate every top-level call in `text`
pub fn scan_calls(text: &str) -> QueryResult<Vec<CallMatch>> {
    let bytes = text.as_bytes();
    let mut calls = Vec::new();
    let mut in_clause = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => i = skip_quoted(bytes, i),
            b'(' => i = find_matching_paren(text, i)? + 1,
            b')' => {
                return Err(QueryError::parse(format!(
                    "Unbalanced parentheses: unexpected ')' at position {} in \"{}\"",
                    i, text
                )))
            }
            b';' => {
                in_clause = false;
                i += 1;
            }
            b if is_word_byte(b) => {
                let start = i;
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                let word = &text[start..i];

                if in_clause {
                    continue;
                }
                if CLAUSE_KEYWORDS.iter().any(|k| word.eq_ignore_ascii_case(k)) {
                    in_clause = true;
                    continue;
                }

                let open = skip_whitespace(bytes, i);
                if open >= bytes.len() || bytes[open] != b'(' || !is_identifier(word) {
                    continue;
                }
                if PREDICATE_KEYWORDS.iter().any(|k| word.eq_ignore_ascii_case(k)) {
                    i = find_matching_paren(text, open)? + 1;
                    continue;
                }

                let (operation, kind) = SeriesFunction::resolve_call(word)
                    .ok_or_else(|| QueryError::unrecognized_function(word))?;
                let close = find_matching_paren(text, open)?;

                calls.push(CallMatch {
                    start,
                    end: close + 1,
                    operation,
                    kind,
                    inner: text[open + 1..close].to_string(),
                });
                i = close + 1;
            }
            _ => i += 1,
        }
    }

    Ok(calls)
}

/// Remove matched call spans from `text`
pub fn remove_calls(text: &str, calls: &[CallMatch]) -> String {
    let mut reduced = String::with_capacity(text.len());
    let mut last = 0;
    for call in calls {
        reduced.push_str(&text[last..call.start]);
        last = call.end;
    }
    reduced.push_str(&text[last..]);
    reduced.trim().to_string()
}

/// Index one past the closing quote (or end of text)
fn skip_quoted(bytes: &[u8], open: usize) -> usize {
    let mut i = open + 1;
    while i < bytes.len() && bytes[i] != b'\'' {
        i += 1;
    }
    i + 1
}

fn skip_whitespace(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    i
}

/// Characters that can appear in a target word (tags, keys, names)
fn is_word_byte(b: u8) -> bool {
    !(b.is_ascii_whitespace() || matches!(b, b';' | b',' | b'(' | b')' | b'\'' | b'=' | b'"'))
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
