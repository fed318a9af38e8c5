//! Build Errors
//!
//! One error enum covering the whole pipeline: configuration loading,
//! variable resolution, template expansion, filesystem access and
//! command execution. Configuration and internal errors abort the build
//! immediately; I/O and execution errors are counted per task and obey
//! the continue-on-error policy.

use std::time::Duration;
use thiserror::Error;

/// Errors produced while loading configuration, resolving variables,
/// expanding templates or running build commands.
#[derive(Error, Debug, Clone)]
pub enum BuildError {
    // -- configuration --
    #[error("unsupported build file version {0} (expected 1)")]
    UnsupportedVersion(u64),

    #[error("configuration '{name}' not found (available: {available})")]
    UnknownConfiguration { name: String, available: String },

    #[error("build type '{name}' not found in configuration '{configuration}' (available: {available})")]
    UnknownBuildType {
        name: String,
        configuration: String,
        available: String,
    },

    #[error("duplicate configuration name '{0}'")]
    DuplicateConfiguration(String),

    #[error("duplicate build type name '{name}' in configuration '{configuration}'")]
    DuplicateBuildType { name: String, configuration: String },

    #[error("build step '{0}': filePattern, directoryPattern and fileList are mutually exclusive")]
    ExclusiveStepOptions(String),

    #[error("build step '{0}': outputFile requires filePattern")]
    OutputFileWithoutFilePattern(String),

    #[error("cannot parse '{path}': {message}")]
    InvalidJson { path: String, message: String },

    #[error("invalid variable name '{0}'")]
    InvalidVariableName(String),

    // -- resolution --
    #[error("variable '{0}' is not defined")]
    UnknownVariable(String),

    #[error("variable '{0}' resolves through itself")]
    VariableCycle(String),

    #[error("variable '{0}' references itself but no outer scope defines it")]
    SelfReference(String),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("no home directory available to expand '{0}'")]
    NoHomeDir(String),

    #[error("sub-template '{0}' contains more than one multi-valued variable")]
    MultipleMultiValued(String),

    #[error("'{text}' produced {count} values where a single value is required")]
    ScalarExpected { text: String, count: usize },

    #[error("unbalanced '{left}' in '{text}'")]
    UnbalancedBrackets { left: String, text: String },

    #[error("malformed variable list '{0}'")]
    MalformedList(String),

    #[error("invalid glob pattern '{pattern}': {message}")]
    BadPattern { pattern: String, message: String },

    #[error("template '{0}' exceeds the maximum expansion depth")]
    ExpansionTooDeep(String),

    // -- i/o --
    #[error("{operation} '{path}': {message}")]
    Io {
        operation: String,
        path: String,
        message: String,
    },

    #[error("forced include '{0}' does not exist")]
    MissingForcedInclude(String),

    // -- execution --
    #[error("command exited with status {0}")]
    CommandFailed(i32),

    #[error("command terminated by a signal")]
    CommandKilled,

    #[error("failed to start command: {0}")]
    SpawnFailed(String),

    #[error("command timed out after {0:?}")]
    CommandTimeout(Duration),

    #[error("build step cancelled")]
    Cancelled,

    // -- internal --
    #[error("internal error: {0}")]
    Internal(String),
}

impl BuildError {
    /// Wrap a filesystem error with the operation and path that caused it.
    pub fn io(operation: &str, path: impl AsRef<std::path::Path>, err: std::io::Error) -> Self {
        BuildError::Io {
            operation: operation.to_string(),
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_unknown_variable() {
        let err = BuildError::UnknownVariable("objDir".to_string());
        assert_eq!(err.to_string(), "variable 'objDir' is not defined");
    }

    #[test]
    fn test_display_exclusive_step_options() {
        let err = BuildError::ExclusiveStepOptions("compile".to_string());
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_io_helper_carries_path() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = BuildError::io("stat", "src/a.cpp", inner);
        let msg = err.to_string();
        assert!(msg.contains("stat"));
        assert!(msg.contains("src/a.cpp"));
        assert!(msg.contains("gone"));
    }
}
