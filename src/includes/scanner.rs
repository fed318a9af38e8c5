//! Include Directive Scanner
//!
//! Line-oriented scan for `#include "..."` and `#include <...>`
//! directives. Block comments are tracked across lines; line comments
//! end a line's contribution. Preprocessor conditionals are ignored, so
//! the result over-approximates: a header behind `#if 0` is still
//! reported.

/// Scanner state carried across lines of one file.
#[derive(Debug, Default)]
pub struct IncludeScanner {
    in_block_comment: bool,
}

impl IncludeScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan one line, updating comment state, and return the included
    /// file name if the line's first code token is an include directive.
    pub fn scan_line(&mut self, line: &str) -> Option<String> {
        let bytes = line.as_bytes();
        let mut i = 0;
        let mut first_token_seen = false;
        let mut found = None;

        while i < bytes.len() {
            if self.in_block_comment {
                match line[i..].find("*/") {
                    Some(pos) => {
                        self.in_block_comment = false;
                        i += pos + 2;
                    }
                    None => return found,
                }
                continue;
            }

            let rest = &line[i..];
            if rest.starts_with("//") {
                return found;
            }
            if rest.starts_with("/*") {
                self.in_block_comment = true;
                i += 2;
                continue;
            }
            if bytes[i].is_ascii_whitespace() {
                i += 1;
                continue;
            }

            if !first_token_seen {
                first_token_seen = true;
                if let Some(stripped) = rest.strip_prefix("#include") {
                    let (name, consumed) = extract_include_name(stripped);
                    found = name;
                    i += 8 + consumed;
                    continue;
                }
            }
            i += 1;
        }

        found
    }
}

/// Extract the `"..."` or `<...>` token after `#include`, returning the
/// name and the number of bytes consumed.
fn extract_include_name(rest: &str) -> (Option<String>, usize) {
    let bytes = rest.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if i >= bytes.len() {
        return (None, i);
    }

    let close = match bytes[i] {
        b'"' => b'"',
        b'<' => b'>',
        _ => return (None, i),
    };
    i += 1;
    let start = i;
    while i < bytes.len() && bytes[i] != close {
        i += 1;
    }
    if i >= bytes.len() {
        // Unterminated token; nothing usable on this line.
        return (None, i);
    }
    (Some(rest[start..i].to_string()), i + 1)
}

/// Scan a whole file's content for include directives, in order.
pub fn parse_includes(content: &str) -> Vec<String> {
    let mut scanner = IncludeScanner::new();
    content
        .lines()
        .filter_map(|line| scanner.scan_line(line))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
