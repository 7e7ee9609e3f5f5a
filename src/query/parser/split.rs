//! Quote- and parenthesis-aware text splitting
//!
//! Target lists are separated by semicolons, function parameters by commas.
//! Neither separator counts inside a single-quoted literal (`'%A;B%'`) or a
//! nested parenthetical (`IN ('a', 'b')`, `Minimum(PPA:1, ...)`).

use crate::query::error::{QueryError, QueryResult};

/// Split `text` on `delimiter` where it occurs at nesting depth zero and
/// outside single quotes
///
/// Fields are trimmed; empty fields are kept so callers can count positions.
pub fn split_top_level(text: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quote = false;

    for c in text.chars() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '(' | '{' | '[' if !in_quote => {
                depth += 1;
                current.push(c);
            }
            ')' | '}' | ']' if !in_quote => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c == delimiter && !in_quote && depth == 0 => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }

    fields.push(current.trim().to_string());
    fields
}

/// Split a target list on top-level semicolons, dropping empty tokens
pub fn split_targets(text: &str) -> Vec<String> {
    split_top_level(text, ';')
        .into_iter()
        .filter(|token| !token.is_empty())
        .collect()
}

/// Find the parenthesis closing the one at byte offset `open`
///
/// Single-quoted text is skipped. Returns a parse error when the
/// parenthesis is never closed.
pub fn find_matching_paren(text: &str, open: usize) -> QueryResult<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_quote = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'\'' => in_quote = !in_quote,
            b'(' if !in_quote => depth += 1,
            b')' if !in_quote => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }

    Err(QueryError::parse(format!(
        "Unbalanced parentheses: '(' at position {} is never closed in \"{}\"",
        open, text
    )))
}

/// Remove one pair of surrounding single or double quotes
pub fn unquote(text: &str) -> &str {
    let text = text.trim();
    if text.len() >= 2
        && ((text.starts_with('\'') && text.ends_with('\''))
            || (text.starts_with('"') && text.ends_with('"')))
    {
        &text[1..text.len() - 1]
    } else {
        text
    }
}

/// Case-insensitive search for a keyword phrase outside single quotes
///
/// `phrase` words must appear with whitespace between them and word
/// boundaries on both ends. Returns the byte offset of the first word.
pub fn find_keyword(text: &str, phrase: &str) -> Option<usize> {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    let bytes = text.as_bytes();
    let mut in_quote = false;

    for i in 0..bytes.len() {
        if bytes[i] == b'\'' {
            in_quote = !in_quote;
            continue;
        }
        if in_quote || (i > 0 && is_word_byte(bytes[i - 1])) {
            continue;
        }
        if let Some(end) = match_words(text, i, &words) {
            if end == bytes.len() || !is_word_byte(bytes[end]) {
                return Some(i);
            }
        }
    }

    None
}

fn match_words(text: &str, mut pos: usize, words: &[&str]) -> Option<usize> {
    let bytes = text.as_bytes();
    for (n, word) in words.iter().enumerate() {
        if n > 0 {
            let start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if pos == start {
                return None;
            }
        }
        let end = pos + word.len();
        if !text.get(pos..end)?.eq_ignore_ascii_case(word) {
            return None;
        }
        pos = end;
    }
    Some(pos)
}

/// Identifier byte; non-ASCII bytes belong to the surrounding word
fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || !b.is_ascii()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_semicolon_inside_quotes_is_not_a_separator() {
        let tokens = split_targets("FILTER ActiveMeasurements WHERE Description LIKE '%A;B%'");
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn test_split_targets_drops_empty() {
        assert_eq!(split_targets(" PPA:1 ;; PPA:2; "), vec!["PPA:1", "PPA:2"]);
    }

    #[test]
    fn test_commas_inside_parentheses_are_kept() {
        let fields = split_top_level("5, Minimum(PPA:1, PPA:2)", ',');
        assert_eq!(fields, vec!["5", "Minimum(PPA:1, PPA:2)"]);

        let fields = split_top_level("FILTER T WHERE ID IN ('a', 'b')", ',');
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn test_find_matching_paren() {
        let text = "Average(Minimum(PPA:1; PPA:2))";
        assert_eq!(find_matching_paren(text, 7).unwrap(), text.len() - 1);
        assert_eq!(find_matching_paren(text, 15).unwrap(), text.len() - 2);
        assert_eq!(find_matching_paren("Label(')', X)", 5).unwrap(), 12);
        assert!(find_matching_paren("Average(PPA:1", 7).is_err());
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("'X'"), "X");
        assert_eq!(unquote("\"X Y\""), "X Y");
        assert_eq!(unquote("X"), "X");
        assert_eq!(unquote("'"), "'");
    }

    #[test]
    fn test_find_keyword() {
        let text = "ActiveMeasurements WHERE Tag = 'order by' ORDER  BY PointTag";
        let pos = find_keyword(text, "ORDER BY").unwrap();
        assert!(text[pos..].starts_with("ORDER  BY"));
        assert_eq!(find_keyword(text, "where"), Some(19));
        assert_eq!(find_keyword("REORDER BY x", "ORDER BY"), None);
        assert_eq!(find_keyword("WHERE x", "WHERE x y"), None);
    }

    #[test]
    fn test_find_keyword_with_non_ascii_text() {
        assert_eq!(find_keyword("Ünit = 'V'", "ORDER BY"), None);
        assert_eq!(find_keyword("Ünit = 'V' ORDER BY Ü", "ORDER BY"), Some(12));
        assert_eq!(find_keyword("ÜORDER BY x", "ORDER BY"), None);
        assert_eq!(find_keyword("Größe TOP 3", "TOP"), Some(8));
    }

    proptest! {
        #[test]
        fn prop_split_without_delimiters_is_identity(s in "[A-Za-z0-9:_ ]{0,40}") {
            let tokens = split_top_level(&s, ';');
            prop_assert_eq!(tokens.len(), 1);
            prop_assert_eq!(tokens[0].as_str(), s.trim());
        }

        #[test]
        fn prop_split_counts_delimiters(parts in prop::collection::vec("[A-Za-z0-9:]{1,8}", 1..6)) {
            let joined = parts.join(";");
            prop_assert_eq!(split_targets(&joined), parts);
        }
    }
}
