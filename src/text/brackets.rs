//! Recursive Bracket Matcher
//!
//! Locates balanced delimiter pairs in a template string. Delimiters may
//! be several characters long (`${`, `$${`), nesting is honoured (only
//! outermost matches are reported) and an escaped delimiter never opens
//! or closes a region.

use crate::errors::{BuildError, Result};

/// One outermost balanced region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BracketMatch {
    /// Byte offset of the left delimiter in the input.
    pub start: usize,
    /// The full region including both delimiters.
    pub outer: String,
    /// The text between the delimiters.
    pub inner: String,
    /// The left delimiter that opened this region.
    pub left: String,
    /// The right delimiter that closed this region.
    pub right: String,
}

/// Find all outermost balanced regions for the given delimiter pairs.
///
/// Pairs are tried longest-left-first at every position so `$${` wins
/// over `${`. Nested regions of any listed pair are consumed but not
/// reported. A left delimiter without a matching right delimiter is an
/// error; a stray right delimiter outside any region is plain text.
pub fn find_matches(
    text: &str,
    pairs: &[(&str, &str)],
    escape_char: char,
) -> Result<Vec<BracketMatch>> {
    // Longest left delimiter first so overlapping prefixes resolve
    // deterministically.
    let mut ordered: Vec<(usize, &str, &str)> = pairs
        .iter()
        .enumerate()
        .map(|(i, (l, r))| (i, *l, *r))
        .collect();
    ordered.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

    let bytes = text.as_bytes();
    let mut matches = Vec::new();
    // Stack of (pair_index, byte offset of the left delimiter).
    let mut stack: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = text[i..].chars().next().unwrap_or('\0');
        if c == escape_char {
            // Skip the escape character and whatever it protects.
            i += c.len_utf8();
            if let Some(next) = text[i..].chars().next() {
                i += next.len_utf8();
            }
            continue;
        }

        // A right delimiter closes the innermost open region first, so
        // `}` ends `${` even though `{` alone is not a delimiter here.
        if let Some(&(pair_idx, start)) = stack.last() {
            let right = pairs[pair_idx].1;
            if text[i..].starts_with(right) {
                stack.pop();
                i += right.len();
                if stack.is_empty() {
                    let (left, right_lex) = pairs[pair_idx];
                    let outer = &text[start..i];
                    matches.push(BracketMatch {
                        start,
                        outer: outer.to_string(),
                        inner: text[start + left.len()..i - right_lex.len()].to_string(),
                        left: left.to_string(),
                        right: right_lex.to_string(),
                    });
                }
                continue;
            }
        }

        if let Some(&(idx, left, _)) = ordered
            .iter()
            .find(|(_, left, _)| text[i..].starts_with(left))
        {
            stack.push((idx, i));
            i += left.len();
            continue;
        }

        i += c.len_utf8();
    }

    if let Some(&(pair_idx, _)) = stack.first() {
        return Err(BuildError::UnbalancedBrackets {
            left: pairs[pair_idx].0.to_string(),
            text: text.to_string(),
        });
    }

    Ok(matches)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ESC: char = '\\';

    fn parens(text: &str) -> Result<Vec<BracketMatch>> {
        find_matches(text, &[("(", ")")], ESC)
    }

    fn variables(text: &str) -> Result<Vec<BracketMatch>> {
        find_matches(text, &[("${", "}"), ("$${", "}")], ESC)
    }

    // -- simple pairs --

    #[test]
    fn test_single_match() {
        let m = parens("a (b) c").unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].start, 2);
        assert_eq!(m[0].outer, "(b)");
        assert_eq!(m[0].inner, "b");
    }

    #[test]
    fn test_multiple_matches_in_order() {
        let m = parens("(a)(b) (c)").unwrap();
        let inners: Vec<&str> = m.iter().map(|m| m.inner.as_str()).collect();
        assert_eq!(inners, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_no_matches() {
        assert!(parens("plain text").unwrap().is_empty());
    }

    // -- nesting --

    #[test]
    fn test_nested_same_kind_reports_outer_only() {
        let m = parens("x ((a) (b)) y").unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].inner, "(a) (b)");
    }

    #[test]
    fn test_deeply_nested() {
        let m = parens("(((a)))").unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].inner, "((a))");
    }

    // -- escapes --

    #[test]
    fn test_escaped_left_does_not_open() {
        let m = parens("\\(a) (b)").unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].inner, "b");
    }

    #[test]
    fn test_escaped_right_does_not_close() {
        let m = parens("(a\\)b)").unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].inner, "a\\)b");
    }

    // -- errors --

    #[test]
    fn test_unbalanced_reports_error() {
        assert!(matches!(
            parens("(a"),
            Err(BuildError::UnbalancedBrackets { .. })
        ));
    }

    #[test]
    fn test_stray_right_is_plain_text() {
        assert!(parens("a) b").unwrap().is_empty());
    }

    // -- multi-character delimiters --

    #[test]
    fn test_single_variable() {
        let m = variables("x ${name} y").unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].left, "${");
        assert_eq!(m[0].inner, "name");
    }

    #[test]
    fn test_multi_variable_wins_over_single() {
        let m = variables("$${list}").unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].left, "$${");
        assert_eq!(m[0].inner, "list");
    }

    #[test]
    fn test_both_kinds_returned_in_order() {
        let m = variables("${a} $${b} ${c}").unwrap();
        let kinds: Vec<(&str, &str)> = m
            .iter()
            .map(|m| (m.left.as_str(), m.inner.as_str()))
            .collect();
        assert_eq!(kinds, vec![("${", "a"), ("$${", "b"), ("${", "c")]);
    }

    #[test]
    fn test_escaped_dollar_is_literal() {
        let m = variables("\\${a} ${b}").unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].inner, "b");
    }

    #[test]
    fn test_start_offsets_are_byte_positions() {
        let m = variables("ab${x}").unwrap();
        assert_eq!(m[0].start, 2);
        assert_eq!(m[0].outer, "${x}");
    }
}
