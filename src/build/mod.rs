//! Build Module
//!
//! Step execution: cancellation, subprocess dispatch, the per-step
//! executor and the top-level driver.

pub mod cancel;
pub mod driver;
pub mod executor;
pub mod process;

pub use cancel::CancelToken;
pub use driver::{BuildDriver, BuildOptions, BuildSummary, PropertiesChoice};
pub use executor::{ExecutorOptions, StepExecutor, StepOutcome};
pub use process::{CommandRunner, ExecResult, ShellRunner, SpawnOptions};
