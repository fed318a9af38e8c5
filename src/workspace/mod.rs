//! Workspace Module
//!
//! Filesystem-facing helpers scoped to the workspace root.

pub mod glob;

pub use glob::{expand_glob, GlobMode};
