//! Variable Resolver
//!
//! Resolves a variable name against the scope stack. Three rules apply
//! in order: a leading `~` yields the home directory, a leading `env:`
//! yields a process environment variable, and everything else walks the
//! stack from outermost to innermost. Each layer's raw value is itself
//! a template, expanded with a lookup that redirects references to the
//! variable's own name back to the value accumulated in outer layers,
//! so an inner layer can write `["$${includePath}", "/extra"]` to mean
//! "extend the outer value".
//!
//! Results are memoised per call site; the pending memo slot doubles as
//! cycle detection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::errors::{BuildError, Result};
use crate::template::{expand_subtemplate, Lookup};
use crate::text::escape;
use crate::workspace::GlobMode;

use super::scope::ScopeStack;
use super::value::Value;

/// Memo cache for one call site. A `Pending` slot marks a resolution in
/// flight; hitting it again means the variable resolves through itself.
#[derive(Debug, Default)]
pub struct ResolveCache {
    slots: HashMap<String, Slot>,
}

#[derive(Debug)]
enum Slot {
    Pending,
    Ready(Value),
}

/// Scope-stack resolver with a per-call-site cache.
pub struct Resolver<'a> {
    scopes: &'a ScopeStack,
    root: &'a Path,
    glob_mode: GlobMode,
    cache: Mutex<ResolveCache>,
}

impl<'a> Resolver<'a> {
    pub fn new(scopes: &'a ScopeStack, root: &'a Path) -> Self {
        Self {
            scopes,
            root,
            glob_mode: GlobMode::ExpandAll,
            cache: Mutex::new(ResolveCache::default()),
        }
    }

    pub fn with_glob_mode(mut self, mode: GlobMode) -> Self {
        self.glob_mode = mode;
        self
    }

    /// Resolve `name` to its (possibly multi-valued) value.
    pub fn resolve(&self, name: &str) -> Result<Value> {
        if let Some(rest) = name.strip_prefix('~') {
            let home = home_dir().ok_or_else(|| BuildError::NoHomeDir(name.to_string()))?;
            let joined = if rest.is_empty() {
                home
            } else {
                home.join(rest.trim_start_matches(['/', '\\']))
            };
            return Ok(Value::Single(escape(&joined.display().to_string())));
        }

        if let Some(var) = name.strip_prefix("env:") {
            return std::env::var(var)
                .map(|v| Value::Single(escape(&v)))
                .map_err(|_| BuildError::MissingEnvVar(var.to_string()));
        }

        {
            let mut cache = self.lock_cache()?;
            match cache.slots.get(name) {
                Some(Slot::Ready(v)) => return Ok(v.clone()),
                Some(Slot::Pending) => {
                    return Err(BuildError::VariableCycle(name.to_string()))
                }
                None => {
                    cache.slots.insert(name.to_string(), Slot::Pending);
                }
            }
        }

        let result = self.resolve_scopes(name);

        let mut cache = self.lock_cache()?;
        match &result {
            Ok(v) => {
                cache.slots.insert(name.to_string(), Slot::Ready(v.clone()));
            }
            Err(_) => {
                cache.slots.remove(name);
            }
        }
        result
    }

    /// Walk the stack outermost to innermost, expanding each layer's raw
    /// value with the previous layers' result available under the
    /// variable's own name.
    fn resolve_scopes(&self, name: &str) -> Result<Value> {
        let mut acc: Option<Value> = None;
        let mut found = false;

        for scope in self.scopes.layers() {
            if let Some(raw) = scope.get(name) {
                found = true;
                let layer = LayerLookup {
                    resolver: self,
                    name,
                    outer: acc.as_ref(),
                };
                let next = expand_raw(raw, &layer)?;
                acc = Some(next);
            }
        }

        if !found {
            return Err(BuildError::UnknownVariable(name.to_string()));
        }
        Ok(acc.unwrap_or(Value::Multi(Vec::new())))
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, ResolveCache>> {
        self.cache
            .lock()
            .map_err(|_| BuildError::Internal("resolver cache poisoned".to_string()))
    }
}

impl Lookup for Resolver<'_> {
    fn lookup(&self, name: &str) -> Result<Value> {
        self.resolve(name)
    }

    fn workspace_root(&self) -> &Path {
        self.root
    }

    fn glob_mode(&self) -> GlobMode {
        self.glob_mode
    }
}

/// Lookup used while expanding one layer's raw value: references to the
/// variable's own name return the outer accumulation, everything else
/// goes back through the resolver.
struct LayerLookup<'a> {
    resolver: &'a Resolver<'a>,
    name: &'a str,
    outer: Option<&'a Value>,
}

impl Lookup for LayerLookup<'_> {
    fn lookup(&self, name: &str) -> Result<Value> {
        if name == self.name {
            return self
                .outer
                .cloned()
                .ok_or_else(|| BuildError::SelfReference(name.to_string()));
        }
        self.resolver.resolve(name)
    }

    fn workspace_root(&self) -> &Path {
        self.resolver.root
    }

    fn glob_mode(&self) -> GlobMode {
        self.resolver.glob_mode
    }
}

/// Expand a raw scope value. A multi-valued raw stays multi-valued;
/// each element may itself fan out and the results are concatenated in
/// order, without dedup.
fn expand_raw(raw: &Value, lookup: &dyn Lookup) -> Result<Value> {
    match raw {
        Value::Single(template) => expand_subtemplate(template, lookup),
        Value::Multi(templates) => {
            let mut values = Vec::new();
            for template in templates {
                values.extend(expand_subtemplate(template, lookup)?.into_values());
            }
            Ok(Value::Multi(values))
        }
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

// ============================================================================
// Tests
// ============================================================================
