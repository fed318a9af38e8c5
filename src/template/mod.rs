//! Template Module
//!
//! The expansion engine for the template mini-language and the lookup
//! seam it resolves variables through.

pub mod engine;

use std::path::Path;

use crate::errors::Result;
use crate::vars::Value;
use crate::workspace::GlobMode;

pub use engine::{expand_subtemplate, expand_template, expand_template_single};

/// Variable lookup as seen by the expansion engine.
///
/// The resolver implements this; tests can provide a map-backed stand-in.
pub trait Lookup {
    /// Resolve a variable name to its value.
    fn lookup(&self, name: &str) -> Result<Value>;

    /// Root directory for inline glob expansion.
    fn workspace_root(&self) -> &Path;

    /// Mode for glob patterns appearing inside `$${...}` regions.
    fn glob_mode(&self) -> GlobMode {
        GlobMode::ExpandAll
    }
}
