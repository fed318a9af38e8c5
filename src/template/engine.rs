//! Template Expansion Engine
//!
//! Evaluates a template string in four passes, each driven by the
//! bracket matcher:
//!
//! 1. `(...)` groups: the inner text is expanded as a sub-template and
//!    space-joined.
//! 2. `[...]` path groups: like groups, but every value goes through
//!    `format_path`; a still-multi-valued result inside a sub-template
//!    is re-encoded as a `$${...}` list literal so fan-out survives.
//! 3. `${name}` single-value variables.
//! 4. `$${...}` multi-value variables: a bare name, a literal list or a
//!    glob pattern. In a sub-template the enclosing text is cloned once
//!    per value and re-expanded; at top level the values are
//!    space-joined in place.
//!
//! Top-level evaluation returns one string, unescaped exactly once.
//! Sub-template evaluation may return a sequence for the caller to fan
//! out over.

use crate::errors::{BuildError, Result};
use crate::text::brackets::{find_matches, BracketMatch};
use crate::text::escape::{format_path, unescape, ESCAPE_CHAR};
use crate::text::list::{variable_list_join, variable_list_parse};
use crate::vars::Value;
use crate::workspace::expand_glob;

use super::Lookup;

/// Nesting limit for recursive expansion. Deeply legitimate templates
/// stay far below this; only self-feeding expansions reach it.
const MAX_EXPANSION_DEPTH: usize = 64;

const GROUP: &[(&str, &str)] = &[("(", ")")];
const PATH_GROUP: &[(&str, &str)] = &[("[", "]")];
const VARIABLES: &[(&str, &str)] = &[("${", "}"), ("$${", "}")];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    TopLevel,
    Sub,
}

/// Expand a template to a single string (top-level mode).
pub fn expand_template(text: &str, lookup: &dyn Lookup) -> Result<String> {
    let value = expand(text, Mode::TopLevel, lookup, 0)?;
    Ok(unescape(&value.join()))
}

/// Expand a template that must produce exactly one value.
pub fn expand_template_single(text: &str, lookup: &dyn Lookup) -> Result<String> {
    match expand(text, Mode::Sub, lookup, 0)? {
        Value::Single(s) => Ok(unescape(&s)),
        Value::Multi(vs) if vs.len() == 1 => Ok(unescape(&vs[0])),
        Value::Multi(vs) => Err(BuildError::ScalarExpected {
            text: text.to_string(),
            count: vs.len(),
        }),
    }
}

/// Expand a sub-template; the result may be multi-valued and is still
/// in escaped form.
pub fn expand_subtemplate(text: &str, lookup: &dyn Lookup) -> Result<Value> {
    expand(text, Mode::Sub, lookup, 0)
}

fn expand(text: &str, mode: Mode, lookup: &dyn Lookup, depth: usize) -> Result<Value> {
    if depth > MAX_EXPANSION_DEPTH {
        return Err(BuildError::ExpansionTooDeep(text.to_string()));
    }

    // Pass 1: groups.
    let matches = find_matches(text, GROUP, ESCAPE_CHAR)?;
    let mut out = rewrite(text, &matches, |m| {
        let inner = expand(&m.inner, Mode::Sub, lookup, depth + 1)?;
        Ok(Some(inner.join()))
    })?;

    // Pass 2: path groups.
    let matches = find_matches(&out, PATH_GROUP, ESCAPE_CHAR)?;
    out = rewrite(&out, &matches, |m| {
        let inner = expand(&m.inner, Mode::Sub, lookup, depth + 1)?;
        let formatted: Vec<String> = inner.values().iter().map(|v| format_path(v)).collect();
        if mode == Mode::Sub && inner.is_multi() {
            Ok(Some(encode_list(&formatted)))
        } else {
            Ok(Some(formatted.join(" ")))
        }
    })?;

    // Pass 3: single-value variables. The matcher reports both `${` and
    // `$${` regions; multi-value regions pass through untouched here.
    let matches = find_matches(&out, VARIABLES, ESCAPE_CHAR)?;
    out = rewrite(&out, &matches, |m| {
        if m.left != "${" {
            return Ok(None);
        }
        match lookup.lookup(&m.inner)? {
            Value::Single(s) => Ok(Some(s)),
            Value::Multi(vs) => {
                if mode == Mode::Sub {
                    Ok(Some(encode_list(&vs)))
                } else {
                    Ok(Some(vs.join(" ")))
                }
            }
        }
    })?;

    // Pass 4: multi-value variables.
    let matches = find_matches(&out, VARIABLES, ESCAPE_CHAR)?;
    let multi_matches: Vec<&BracketMatch> =
        matches.iter().filter(|m| m.left == "$${").collect();
    if multi_matches.is_empty() {
        return Ok(Value::Single(out));
    }

    // Resolve each distinct region once; occurrences share the result.
    let mut resolved: Vec<(String, Value)> = Vec::new();
    for m in &multi_matches {
        if !resolved.iter().any(|(inner, _)| *inner == m.inner) {
            let value = eval_multi_region(&m.inner, lookup)?;
            resolved.push((m.inner.clone(), value));
        }
    }

    if mode == Mode::TopLevel {
        let spliced = rewrite(&out, &matches, |m| {
            if m.left != "$${" {
                return Ok(None);
            }
            let value = lookup_resolved(&resolved, &m.inner);
            Ok(Some(value.join()))
        })?;
        return Ok(Value::Single(spliced));
    }

    // Sub-template: at most one distinct multi-valued region, fanned out
    // by cloning the whole text once per value.
    let fan: Vec<&(String, Value)> = resolved.iter().filter(|(_, v)| v.is_multi()).collect();
    if fan.len() > 1 {
        return Err(BuildError::MultipleMultiValued(text.to_string()));
    }

    if fan.is_empty() {
        let spliced = rewrite(&out, &matches, |m| {
            if m.left != "$${" {
                return Ok(None);
            }
            let value = lookup_resolved(&resolved, &m.inner);
            Ok(Some(value.join()))
        })?;
        return Ok(Value::Single(spliced));
    }

    let (fan_inner, fan_value) = fan[0];
    let mut collected = Vec::new();
    for val in fan_value.values() {
        let clone = rewrite(&out, &matches, |m| {
            if m.left != "$${" {
                return Ok(None);
            }
            if m.inner == *fan_inner {
                Ok(Some(val.clone()))
            } else {
                Ok(Some(lookup_resolved(&resolved, &m.inner).join()))
            }
        })?;
        collected.extend(expand(&clone, Mode::Sub, lookup, depth + 1)?.into_values());
    }

    Ok(Value::Multi(uniq(collected)))
}

/// Decide what a `$${...}` region means and produce its values.
///
/// Lexical form decides: a leading quote or an unescaped comma makes a
/// literal list, glob metacharacters make a glob pattern, anything else
/// is a variable name.
fn eval_multi_region(inner: &str, lookup: &dyn Lookup) -> Result<Value> {
    if inner.trim().is_empty() {
        // The relay encoding of an empty sequence.
        return Ok(Value::Multi(Vec::new()));
    }
    if inner.trim_start().starts_with('\'') || contains_unescaped(inner, ',') {
        return variable_list_parse(inner).map(Value::Multi);
    }
    if inner.contains('*') || inner.contains('?') {
        let results = expand_glob(lookup.workspace_root(), &unescape(inner), lookup.glob_mode())?;
        return Ok(Value::Multi(results));
    }
    lookup.lookup(inner)
}

fn lookup_resolved(resolved: &[(String, Value)], inner: &str) -> Value {
    resolved
        .iter()
        .find(|(i, _)| i == inner)
        .map(|(_, v)| v.clone())
        // Every region was resolved above; this arm is unreachable.
        .unwrap_or_else(|| Value::Multi(Vec::new()))
}

/// Rebuild `text` replacing each match span with the callback's output.
/// `None` keeps the original region. Text between spans is untouched,
/// so escaped regions elsewhere can never be clobbered.
fn rewrite<F>(text: &str, matches: &[BracketMatch], mut replacement: F) -> Result<String>
where
    F: FnMut(&BracketMatch) -> Result<Option<String>>,
{
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    for m in matches {
        out.push_str(&text[pos..m.start]);
        match replacement(m)? {
            Some(r) => out.push_str(&r),
            None => out.push_str(&m.outer),
        }
        pos = m.start + m.outer.len();
    }
    out.push_str(&text[pos..]);
    Ok(out)
}

/// Re-encode values as a `$${...}` list literal for internal relay.
fn encode_list(values: &[String]) -> String {
    format!("$${{{}}}", variable_list_join(values))
}

fn contains_unescaped(text: &str, target: char) -> bool {
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE_CHAR {
            chars.next();
        } else if c == target {
            return true;
        }
    }
    false
}

/// Order-preserving dedup at a fan-out join point.
fn uniq(values: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values.into_iter().filter(|v| seen.insert(v.clone())).collect()
}

// ============================================================================
// Tests
// ============================================================================
