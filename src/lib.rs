//! cppbuild - a declarative, multi-step, incremental build driver
//!
//! Reads a JSON build file describing named configurations, optional
//! build types and an ordered list of templated build steps, then runs
//! each step once, per matching file (in parallel) or per matching
//! directory, skipping work whose declared output is already newer than
//! its input.

pub mod build;
pub mod config;
pub mod errors;
pub mod includes;
pub mod template;
pub mod text;
pub mod vars;
pub mod workspace;

pub use build::{BuildDriver, BuildOptions, BuildSummary, PropertiesChoice};
pub use config::{BuildConfiguration, BuildStep, BuildType, GlobalConfiguration};
pub use errors::{BuildError, Result};
pub use vars::{Scope, ScopeStack, Value};
