//! C/C++ Properties Reader
//!
//! Reads the subset of the editor's C/C++ properties file the build
//! cares about: per named configuration, the `includePath`,
//! `forcedInclude` and `defines` arrays. Host-style variables
//! (`${workspaceFolder}`, `${env:NAME}`, ...) are substituted up front
//! so the values enter the resolver as literal strings.

use std::path::Path;

use lazy_static::lazy_static;
use regex_lite::Regex;
use serde::Deserialize;

use crate::errors::{BuildError, Result};
use crate::text::escape;
use crate::vars::{Scope, Value};

lazy_static! {
    static ref HOST_VARIABLE: Regex =
        Regex::new(r"\$\{([^}]*)\}").expect("constant pattern is valid");
}

/// One named configuration in the properties file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CppConfiguration {
    pub name: String,
    #[serde(default)]
    pub include_path: Vec<String>,
    #[serde(default)]
    pub forced_include: Vec<String>,
    #[serde(default)]
    pub defines: Vec<String>,
}

/// The properties file, reduced to what the build reads.
#[derive(Debug, Clone, Deserialize)]
pub struct CppProperties {
    pub configurations: Vec<CppConfiguration>,
}

impl CppProperties {
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| BuildError::io("read", path, e))?;
        serde_json::from_str(&content).map_err(|e| BuildError::InvalidJson {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// The configuration matching the build configuration's name.
    pub fn configuration(&self, name: &str) -> Option<&CppConfiguration> {
        self.configurations.iter().find(|c| c.name == name)
    }
}

impl CppConfiguration {
    /// Build the scope layer the resolver sees: `includePath`,
    /// `forcedInclude` and `defines` as multi-valued variables, host
    /// variables substituted and every value escaped so its content is
    /// literal to the template engine.
    pub fn scope(&self, root: &Path) -> Scope {
        let literal = |values: &[String]| {
            Value::Multi(
                values
                    .iter()
                    .map(|v| escape(&resolve_host_variables(v, root)))
                    .collect(),
            )
        };

        let mut scope = Scope::new();
        scope.insert("includePath".to_string(), literal(&self.include_path));
        scope.insert("forcedInclude".to_string(), literal(&self.forced_include));
        scope.insert("defines".to_string(), literal(&self.defines));
        scope
    }
}

/// Substitute host-compatible `${...}` variables. Unknown forms are
/// left verbatim; an unset environment variable becomes empty, matching
/// the host editor's behaviour.
pub fn resolve_host_variables(value: &str, root: &Path) -> String {
    HOST_VARIABLE
        .replace_all(value, |caps: &regex_lite::Captures| {
            let name = &caps[1];
            if name == "workspaceFolder" || name == "workspaceRoot" {
                return root.display().to_string();
            }
            if name == "workspaceFolderBasename" {
                return root
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
            }
            if let Some(var) = name.strip_prefix("env:") {
                return std::env::var(var).unwrap_or_default();
            }
            caps[0].to_string()
        })
        .to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "configurations": [
            {
                "name": "Linux",
                "includePath": ["${workspaceFolder}/include", "/usr/include"],
                "forcedInclude": ["${workspaceFolder}/src/pch.h"],
                "defines": ["NDEBUG", "VERSION=1"]
            },
            {
                "name": "Win32",
                "includePath": []
            }
        ]
    }"#;

    #[test]
    fn test_parse_subset() {
        let properties: CppProperties = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(properties.configurations.len(), 2);
        let linux = properties.configuration("Linux").unwrap();
        assert_eq!(linux.include_path.len(), 2);
        assert_eq!(linux.defines, vec!["NDEBUG", "VERSION=1"]);
    }

    #[test]
    fn test_missing_configuration_is_none() {
        let properties: CppProperties = serde_json::from_str(SAMPLE).unwrap();
        assert!(properties.configuration("Mac").is_none());
    }

    #[test]
    fn test_workspace_folder_substitution() {
        let resolved = resolve_host_variables("${workspaceFolder}/include", Path::new("/work"));
        assert_eq!(resolved, "/work/include");
    }

    #[test]
    fn test_workspace_folder_basename() {
        let resolved =
            resolve_host_variables("${workspaceFolderBasename}", Path::new("/work/project"));
        assert_eq!(resolved, "project");
    }

    #[test]
    fn test_env_substitution() {
        std::env::set_var("CPPBUILD_PROPS_TEST", "/opt/sdk");
        let resolved = resolve_host_variables("${env:CPPBUILD_PROPS_TEST}/inc", Path::new("/w"));
        assert_eq!(resolved, "/opt/sdk/inc");
    }

    #[test]
    fn test_unset_env_becomes_empty() {
        let resolved =
            resolve_host_variables("${env:CPPBUILD_PROPS_NO_VAR}/inc", Path::new("/w"));
        assert_eq!(resolved, "/inc");
    }

    #[test]
    fn test_unknown_variable_left_verbatim() {
        let resolved = resolve_host_variables("${default}", Path::new("/w"));
        assert_eq!(resolved, "${default}");
    }

    #[test]
    fn test_scope_values_are_escaped_literals() {
        let properties: CppProperties = serde_json::from_str(
            r#"{
                "configurations": [
                    { "name": "x", "defines": ["A(B)", "PLAIN"] }
                ]
            }"#,
        )
        .unwrap();
        let scope = properties.configuration("x").unwrap().scope(Path::new("/w"));
        let defines = scope.get("defines").unwrap();
        assert_eq!(
            defines.values(),
            ["A\\(B\\)".to_string(), "PLAIN".to_string()]
        );
    }

    #[test]
    fn test_scope_always_defines_all_three() {
        let properties: CppProperties = serde_json::from_str(SAMPLE).unwrap();
        let scope = properties.configuration("Win32").unwrap().scope(Path::new("/w"));
        assert!(scope.contains_key("includePath"));
        assert!(scope.contains_key("forcedInclude"));
        assert!(scope.contains_key("defines"));
    }
}
