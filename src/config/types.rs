//! Build Configuration Types
//!
//! The JSON model of the build-steps file, plus the validation pass run
//! after deserialisation. Step names are free-form; configuration names
//! and build-type names within a configuration must be unique.

use std::path::Path;

use lazy_static::lazy_static;
use regex_lite::Regex;
use serde::Deserialize;

use crate::errors::{BuildError, Result};
use crate::vars::Scope;

/// The only supported build file version.
pub const SUPPORTED_VERSION: u64 = 1;

lazy_static! {
    static ref VARIABLE_NAME: Regex =
        Regex::new("^[A-Za-z0-9_-]+$").expect("constant pattern is valid");
}

/// One templated command, optionally fanned out over files or
/// directories.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStep {
    pub name: String,
    /// Command template expanded per §file / directory / step.
    pub command: String,
    #[serde(default)]
    pub params: Option<Scope>,
    /// Fan out over matching files, one task per file.
    #[serde(default)]
    pub file_pattern: Option<String>,
    /// Iterate matching directories sequentially.
    #[serde(default)]
    pub directory_pattern: Option<String>,
    /// Expand once into multi-valued file variables.
    #[serde(default)]
    pub file_list: Option<String>,
    #[serde(default)]
    pub output_directory: Option<String>,
    /// Per-file output used for the incremental skip check; requires
    /// `filePattern`.
    #[serde(default)]
    pub output_file: Option<String>,
    #[serde(default)]
    pub trim_include_paths: Option<bool>,
}

impl BuildStep {
    fn validate(&self) -> Result<()> {
        let patterns = [
            self.file_pattern.is_some(),
            self.directory_pattern.is_some(),
            self.file_list.is_some(),
        ];
        if patterns.iter().filter(|p| **p).count() > 1 {
            return Err(BuildError::ExclusiveStepOptions(self.name.clone()));
        }
        if self.output_file.is_some() && self.file_pattern.is_none() {
            return Err(BuildError::OutputFileWithoutFilePattern(self.name.clone()));
        }
        validate_params(self.params.as_ref())
    }
}

/// A named overlay of variables, e.g. debug vs release.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildType {
    pub name: String,
    #[serde(default)]
    pub params: Option<Scope>,
}

/// A named, ordered sequence of build steps.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfiguration {
    pub name: String,
    #[serde(default)]
    pub params: Option<Scope>,
    #[serde(default)]
    pub build_types: Vec<BuildType>,
    pub build_steps: Vec<BuildStep>,
    /// Editor integration pass-through; not interpreted here.
    #[serde(default)]
    pub problem_matchers: Option<serde_json::Value>,
}

impl BuildConfiguration {
    /// Look up a build type by name, reporting the available names on a
    /// miss.
    pub fn build_type(&self, name: &str) -> Result<&BuildType> {
        self.build_types
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| BuildError::UnknownBuildType {
                name: name.to_string(),
                configuration: self.name.clone(),
                available: names(self.build_types.iter().map(|t| t.name.as_str())),
            })
    }
}

/// The whole build-steps file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfiguration {
    pub version: u64,
    #[serde(default)]
    pub params: Option<Scope>,
    pub configurations: Vec<BuildConfiguration>,
}

impl GlobalConfiguration {
    /// Read and validate a build-steps file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BuildError::io("read", path, e))?;
        let config: GlobalConfiguration =
            serde_json::from_str(&content).map_err(|e| BuildError::InvalidJson {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != SUPPORTED_VERSION {
            return Err(BuildError::UnsupportedVersion(self.version));
        }
        validate_params(self.params.as_ref())?;

        let mut seen = std::collections::HashSet::new();
        for configuration in &self.configurations {
            if !seen.insert(configuration.name.as_str()) {
                return Err(BuildError::DuplicateConfiguration(
                    configuration.name.clone(),
                ));
            }
            validate_params(configuration.params.as_ref())?;

            let mut types = std::collections::HashSet::new();
            for build_type in &configuration.build_types {
                if !types.insert(build_type.name.as_str()) {
                    return Err(BuildError::DuplicateBuildType {
                        name: build_type.name.clone(),
                        configuration: configuration.name.clone(),
                    });
                }
                validate_params(build_type.params.as_ref())?;
            }

            for step in &configuration.build_steps {
                step.validate()?;
            }
        }
        Ok(())
    }

    /// Look up a configuration by name, reporting the available names on
    /// a miss.
    pub fn configuration(&self, name: &str) -> Result<&BuildConfiguration> {
        self.configurations
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| BuildError::UnknownConfiguration {
                name: name.to_string(),
                available: names(self.configurations.iter().map(|c| c.name.as_str())),
            })
    }
}

fn validate_params(params: Option<&Scope>) -> Result<()> {
    if let Some(scope) = params {
        for name in scope.keys() {
            if !VARIABLE_NAME.is_match(name) {
                return Err(BuildError::InvalidVariableName(name.clone()));
            }
        }
    }
    Ok(())
}

fn names<'a>(iter: impl Iterator<Item = &'a str>) -> String {
    let list: Vec<&str> = iter.collect();
    if list.is_empty() {
        "none".to_string()
    } else {
        list.join(", ")
    }
}

// ============================================================================
// Tests
// ============================================================================
