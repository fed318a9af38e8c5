//! Sample Configuration Writer
//!
//! Writes a runnable starter build file for `--initialize`: one gcc
//! configuration with debug and release build types, a per-file compile
//! step and a link step.

use std::path::{Path, PathBuf};

use crate::errors::{BuildError, Result};

/// Default build file name under `.vscode`.
pub const DEFAULT_BUILD_FILE: &str = "c_cpp_build.json";

/// Write the sample build file. A directory target gets the default
/// file name appended; parent directories are created as needed.
pub fn write_sample(target: &Path) -> Result<PathBuf> {
    let path = if target.is_dir() {
        target.join(DEFAULT_BUILD_FILE)
    } else {
        target.to_path_buf()
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| BuildError::io("mkdir", parent, e))?;
        }
    }

    let content = sample_configuration();
    std::fs::write(&path, content).map_err(|e| BuildError::io("write", &path, e))?;
    Ok(path)
}

fn sample_configuration() -> String {
    let sample = serde_json::json!({
        "version": 1,
        "params": {
            "buildDir": "build/${buildTypeName}"
        },
        "configurations": [
            {
                "name": "gcc",
                "params": {
                    "compilerArgs": ["-Wall", "-Wextra"],
                    "includePath": ["include"],
                    "defines": []
                },
                "buildTypes": [
                    { "name": "debug", "params": { "buildTypeArgs": "-O0 -g" } },
                    { "name": "release", "params": { "buildTypeArgs": "-O2 -DNDEBUG" } }
                ],
                "buildSteps": [
                    {
                        "name": "C++ Compile",
                        "filePattern": "**/*.cpp",
                        "outputFile": "${buildDir}/${fileDirectory}/${fileName}.o",
                        "command": "g++ -c ${buildTypeArgs} ($${compilerArgs}) (-I[$${includePath}]) (-D$${defines}) [${filePath}] -o [${outputFile}]"
                    },
                    {
                        "name": "C++ Link",
                        "fileList": "${buildDir}/**/*.o",
                        "command": "g++ [$${filePath}] -o [${buildDir}/main]"
                    }
                ]
            }
        ]
    });
    // to_string_pretty on a literal cannot fail.
    serde_json::to_string_pretty(&sample).unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================
