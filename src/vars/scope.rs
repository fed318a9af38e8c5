//! Scopes and the Scope Stack
//!
//! A scope maps variable names to raw (unexpanded) values; a scope stack
//! layers them so inner scopes shadow or extend outer ones. Per-file
//! tasks fork the stack cheaply: layers are shared read-only behind
//! `Arc` and each fork adds its own innermost scope.

use std::collections::HashMap;
use std::sync::Arc;

use super::value::Value;

/// A single layer of variable definitions. Values are raw templates;
/// expansion happens at resolution time.
pub type Scope = HashMap<String, Value>;

/// An ordered list of scopes, outermost first.
#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    layers: Vec<Arc<Scope>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scope as the new innermost layer. Empty scopes are skipped.
    pub fn push(&mut self, scope: Scope) {
        if !scope.is_empty() {
            self.layers.push(Arc::new(scope));
        }
    }

    /// Fork the stack with an extra innermost layer, leaving `self`
    /// untouched. This is the per-file copy-on-fork operation.
    pub fn layered(&self, scope: Scope) -> ScopeStack {
        let mut forked = self.clone();
        forked.push(scope);
        forked
    }

    /// Iterate layers from outermost to innermost.
    pub fn layers(&self) -> impl Iterator<Item = &Scope> {
        self.layers.iter().map(|l| l.as_ref())
    }

    /// True when any layer defines `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.layers.iter().any(|l| l.contains_key(name))
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Convenience constructor for literal scopes in driver and test code.
pub fn scope_from<I, K, V>(entries: I) -> Scope
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    entries
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
