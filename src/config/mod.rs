//! Configuration Module
//!
//! The build-steps file model, the C/C++ properties subset reader and
//! the sample-configuration writer.

pub mod properties;
pub mod sample;
pub mod types;

pub use properties::{CppConfiguration, CppProperties};
pub use types::{BuildConfiguration, BuildStep, BuildType, GlobalConfiguration};
