//! Include Analysis Module
//!
//! Scans C/C++ sources for `#include` directives and computes the
//! minimal subset of include directories a translation unit actually
//! needs, so compile commands can drop the rest.

pub mod analyser;
pub mod scanner;

pub use analyser::IncludeAnalyser;
pub use scanner::parse_includes;
