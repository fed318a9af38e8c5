//! Glob Expander
//!
//! Expands a pattern to files, directories or both against a workspace
//! root. Relative patterns match under the root; absolute patterns
//! match from the filesystem root. Results come back workspace-relative
//! for relative patterns, in alphabetical order, escaped for the
//! template layer.

use std::path::Path;

use crate::errors::{BuildError, Result};
use crate::text::escape;

/// What a pattern is allowed to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobMode {
    /// Only files.
    FilesOnly,
    /// Only directories.
    DirectoriesOnly,
    /// Return the pattern itself without touching the filesystem.
    NoExpand,
    /// Files and directories.
    ExpandAll,
}

/// Expand `pattern` against `root` according to `mode`.
pub fn expand_glob(root: &Path, pattern: &str, mode: GlobMode) -> Result<Vec<String>> {
    if mode == GlobMode::NoExpand {
        return Ok(vec![pattern.to_string()]);
    }

    let absolute = Path::new(pattern).is_absolute();
    let full_pattern = if absolute {
        pattern.to_string()
    } else {
        root.join(pattern).display().to_string()
    };

    let paths = glob::glob(&full_pattern).map_err(|e| BuildError::BadPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;

    let mut results = Vec::new();
    for entry in paths {
        let path = match entry {
            Ok(p) => p,
            Err(_) => continue,
        };

        let is_dir = path.is_dir();
        match mode {
            GlobMode::FilesOnly if is_dir => continue,
            GlobMode::DirectoriesOnly if !is_dir => continue,
            _ => {}
        }

        let rendered = if absolute {
            path.display().to_string()
        } else {
            path.strip_prefix(root)
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| path.display().to_string())
        };

        let normalised = rendered.replace('\\', "/");
        let trimmed = normalised.trim_end_matches('/');
        results.push(escape(trimmed));
    }

    // glob yields entries in alphabetical order already; sorting keeps
    // the guarantee independent of the walk.
    results.sort();
    Ok(results)
}

// ============================================================================
// Tests
// ============================================================================
