//! Build Driver
//!
//! Loads the build configuration, composes the scope stack, iterates
//! build steps strictly in declaration order and aggregates their
//! outcomes. Stops after the first failing step unless continue-on-error
//! is set.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::build::cancel::CancelToken;
use crate::build::executor::{StepExecutor, StepOutcome};
use crate::build::process::{CommandRunner, ShellRunner};
use crate::config::properties::CppProperties;
use crate::config::types::GlobalConfiguration;
use crate::errors::{BuildError, Result};
use crate::includes::IncludeAnalyser;
use crate::text::escape;
use crate::vars::{Scope, ScopeStack, Value};

use super::executor::ExecutorOptions;

/// Default build-steps file, relative to the workspace root.
pub const DEFAULT_BUILD_FILE: &str = ".vscode/c_cpp_build.json";

/// Default C/C++ properties file, relative to the workspace root.
pub const DEFAULT_PROPERTIES_FILE: &str = ".vscode/c_cpp_properties.json";

/// Where to read C/C++ properties from.
#[derive(Debug, Clone, Default)]
pub enum PropertiesChoice {
    /// Use the default path when the file exists, skip quietly when not.
    #[default]
    Default,
    /// Do not read a properties file.
    Disabled,
    /// Use this path; a missing file is an error.
    Path(PathBuf),
}

/// Everything the driver needs for one build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub workspace_root: PathBuf,
    /// Build-steps file; `None` selects the default under the root.
    pub build_file: Option<PathBuf>,
    pub properties: PropertiesChoice,
    /// Configuration to build.
    pub configuration: String,
    /// Optional build type within the configuration.
    pub build_type: Option<String>,
    /// `name=value` pairs layered atop all other scopes.
    pub cli_variables: Vec<(String, String)>,
    pub executor: ExecutorOptions,
}

/// Aggregate result of a whole build.
#[derive(Debug, Clone)]
pub struct BuildSummary {
    pub steps_run: usize,
    pub totals: StepOutcome,
    pub elapsed: Duration,
}

impl BuildSummary {
    pub fn success(&self) -> bool {
        self.totals.errors_encountered == 0
    }
}

/// Drives one build end to end.
pub struct BuildDriver {
    options: BuildOptions,
    runner: Arc<dyn CommandRunner>,
}

impl BuildDriver {
    pub fn new(options: BuildOptions) -> Self {
        Self::with_runner(options, Arc::new(ShellRunner))
    }

    pub fn with_runner(options: BuildOptions, runner: Arc<dyn CommandRunner>) -> Self {
        Self { options, runner }
    }

    pub async fn run(&self) -> Result<BuildSummary> {
        let start = Instant::now();
        let root = &self.options.workspace_root;

        let build_file = self
            .options
            .build_file
            .clone()
            .unwrap_or_else(|| root.join(DEFAULT_BUILD_FILE));
        let config = GlobalConfiguration::load(&build_file)?;
        let configuration = config.configuration(&self.options.configuration)?;

        let build_type = match &self.options.build_type {
            Some(name) => Some(configuration.build_type(name)?),
            None => None,
        };
        let build_type_name = build_type.map(|t| t.name.as_str()).unwrap_or("");

        log::info!(
            "building configuration '{}'{}",
            configuration.name,
            build_type
                .map(|t| format!(" ({})", t.name))
                .unwrap_or_default()
        );

        let mut scopes = ScopeStack::new();
        scopes.push(defaults_scope(root, &configuration.name, build_type_name));
        if let Some(scope) = self.properties_scope(&configuration.name)? {
            scopes.push(scope);
        }
        if let Some(params) = &config.params {
            scopes.push(params.clone());
        }
        if let Some(params) = &configuration.params {
            scopes.push(params.clone());
        }
        if let Some(build_type) = build_type {
            if let Some(params) = &build_type.params {
                scopes.push(params.clone());
            }
        }

        let cli_scope = cli_scope(&self.options.cli_variables)?;

        let analyser = Arc::new(IncludeAnalyser::new(root.clone()));
        let executor = StepExecutor::new(
            root.clone(),
            self.options.executor.clone(),
            self.runner.clone(),
            analyser,
            cli_scope,
        );

        let mut totals = StepOutcome::default();
        let mut steps_run = 0;

        for step in &configuration.build_steps {
            log::info!("step: {}", step.name);
            let cancel = CancelToken::new();

            match executor.run_step(step, &scopes, &cancel).await {
                Ok(outcome) => {
                    log::info!(
                        "step '{}': filesProcessed: {}, filesSkipped: {}, errorsEncountered: {}",
                        step.name,
                        outcome.files_processed,
                        outcome.files_skipped,
                        outcome.errors_encountered
                    );
                    steps_run += 1;
                    let failed = outcome.errors_encountered > 0;
                    totals.absorb(outcome);
                    if failed && !self.options.executor.continue_on_error {
                        break;
                    }
                }
                Err(e) => {
                    if self.options.executor.continue_on_error {
                        log::error!("step '{}': {}", step.name, e);
                        steps_run += 1;
                        totals.errors_encountered += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Ok(BuildSummary {
            steps_run,
            totals,
            elapsed: start.elapsed(),
        })
    }

    /// Load the properties layer for the named configuration, honouring
    /// the default / disabled / explicit-path choice.
    fn properties_scope(&self, configuration: &str) -> Result<Option<Scope>> {
        let root = &self.options.workspace_root;
        let path = match &self.options.properties {
            PropertiesChoice::Disabled => return Ok(None),
            PropertiesChoice::Default => {
                let path = root.join(DEFAULT_PROPERTIES_FILE);
                if !path.is_file() {
                    return Ok(None);
                }
                path
            }
            PropertiesChoice::Path(path) => path.clone(),
        };

        let properties = CppProperties::load(&path)?;
        match properties.configuration(configuration) {
            Some(config) => Ok(Some(config.scope(root))),
            None => {
                log::debug!(
                    "properties file '{}' has no configuration '{}'",
                    path.display(),
                    configuration
                );
                Ok(None)
            }
        }
    }
}

/// Outermost scope: workspace identity and the selected configuration.
fn defaults_scope(root: &std::path::Path, config_name: &str, build_type_name: &str) -> Scope {
    let folder_name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut scope = Scope::new();
    scope.insert(
        "workspaceRoot".to_string(),
        Value::Single(escape(&root.display().to_string())),
    );
    scope.insert(
        "workspaceRootFolderName".to_string(),
        Value::Single(escape(&folder_name)),
    );
    scope.insert(
        "configName".to_string(),
        Value::Single(escape(config_name)),
    );
    scope.insert(
        "buildTypeName".to_string(),
        Value::Single(escape(build_type_name)),
    );
    scope
}

/// CLI `-v name=value` pairs as the innermost scope. Values are raw
/// templates, like any other scope value.
fn cli_scope(variables: &[(String, String)]) -> Result<Scope> {
    let mut scope = Scope::new();
    for (name, value) in variables {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(BuildError::InvalidVariableName(name.clone()));
        }
        scope.insert(name.clone(), Value::Single(value.clone()));
    }
    Ok(scope)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::process::{ExecResult, SpawnOptions};
    use async_trait::async_trait;
    use std::fs;
    use tempfile::TempDir;

    struct FakeRunner {
        commands: std::sync::Mutex<Vec<String>>,
        fail_containing: Option<String>,
    }

    impl FakeRunner {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                commands: std::sync::Mutex::new(Vec::new()),
                fail_containing: None,
            })
        }

        fn failing_on(marker: &str) -> Arc<Self> {
            Arc::new(Self {
                commands: std::sync::Mutex::new(Vec::new()),
                fail_containing: Some(marker.to_string()),
            })
        }

        fn commands(&self) -> Vec<String> {
            self.commands.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(
            &self,
            command: &str,
            _options: &SpawnOptions,
            _cancel: &CancelToken,
        ) -> Result<ExecResult> {
            if let Ok(mut commands) = self.commands.lock() {
                commands.push(command.to_string());
            }
            let fail = self
                .fail_containing
                .as_ref()
                .map(|m| command.contains(m.as_str()))
                .unwrap_or(false);
            Ok(ExecResult {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: if fail { 1 } else { 0 },
            })
        }
    }

    fn write_build_file(root: &std::path::Path, content: &str) {
        fs::create_dir_all(root.join(".vscode")).unwrap();
        fs::write(root.join(DEFAULT_BUILD_FILE), content).unwrap();
    }

    fn options(root: &std::path::Path, configuration: &str) -> BuildOptions {
        BuildOptions {
            workspace_root: root.to_path_buf(),
            build_file: None,
            properties: PropertiesChoice::Default,
            configuration: configuration.to_string(),
            build_type: None,
            cli_variables: Vec::new(),
            executor: ExecutorOptions::default(),
        }
    }

    const TWO_STEP: &str = r#"{
        "version": 1,
        "params": { "cc": "gcc" },
        "configurations": [
            {
                "name": "default",
                "buildTypes": [
                    { "name": "debug", "params": { "flags": "-O0 -g" } },
                    { "name": "release", "params": { "flags": "-O2" } }
                ],
                "buildSteps": [
                    {
                        "name": "compile",
                        "filePattern": "*.cpp",
                        "command": "${cc} ${flags} -c [${filePath}]"
                    },
                    { "name": "link", "command": "${cc} -o app" }
                ]
            }
        ]
    }"#;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_steps_run_in_declared_order() {
        let dir = TempDir::new().unwrap();
        write_build_file(dir.path(), TWO_STEP);
        fs::write(dir.path().join("main.cpp"), "").unwrap();

        let runner = FakeRunner::new();
        let mut opts = options(dir.path(), "default");
        opts.build_type = Some("debug".to_string());
        let driver = BuildDriver::with_runner(opts, runner.clone());

        let summary = driver.run().await.unwrap();
        assert!(summary.success());
        assert_eq!(summary.steps_run, 2);
        assert_eq!(summary.totals.files_processed, 2);
        assert_eq!(
            runner.commands(),
            vec!["gcc -O0 -g -c main.cpp", "gcc -o app"]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_build_type_selects_params() {
        let dir = TempDir::new().unwrap();
        write_build_file(dir.path(), TWO_STEP);
        fs::write(dir.path().join("main.cpp"), "").unwrap();

        let runner = FakeRunner::new();
        let mut opts = options(dir.path(), "default");
        opts.build_type = Some("release".to_string());
        let driver = BuildDriver::with_runner(opts, runner.clone());

        driver.run().await.unwrap();
        assert_eq!(runner.commands()[0], "gcc -O2 -c main.cpp");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_configuration_fails() {
        let dir = TempDir::new().unwrap();
        write_build_file(dir.path(), TWO_STEP);

        let driver = BuildDriver::with_runner(options(dir.path(), "nope"), FakeRunner::new());
        assert!(matches!(
            driver.run().await,
            Err(BuildError::UnknownConfiguration { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unknown_build_type_fails() {
        let dir = TempDir::new().unwrap();
        write_build_file(dir.path(), TWO_STEP);

        let mut opts = options(dir.path(), "default");
        opts.build_type = Some("profile".to_string());
        let driver = BuildDriver::with_runner(opts, FakeRunner::new());
        assert!(matches!(
            driver.run().await,
            Err(BuildError::UnknownBuildType { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failing_step_stops_the_build() {
        let dir = TempDir::new().unwrap();
        write_build_file(dir.path(), TWO_STEP);
        fs::write(dir.path().join("main.cpp"), "").unwrap();

        let runner = FakeRunner::failing_on("-c");
        let mut opts = options(dir.path(), "default");
        opts.build_type = Some("debug".to_string());
        let driver = BuildDriver::with_runner(opts, runner.clone());

        let summary = driver.run().await.unwrap();
        assert!(!summary.success());
        assert_eq!(summary.steps_run, 1);
        // The link step never ran.
        assert!(runner.commands().iter().all(|c| !c.contains("-o app")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_continue_on_error_reaches_later_steps() {
        let dir = TempDir::new().unwrap();
        write_build_file(dir.path(), TWO_STEP);
        fs::write(dir.path().join("main.cpp"), "").unwrap();

        let runner = FakeRunner::failing_on("-c");
        let mut opts = options(dir.path(), "default");
        opts.build_type = Some("debug".to_string());
        opts.executor.continue_on_error = true;
        let driver = BuildDriver::with_runner(opts, runner.clone());

        let summary = driver.run().await.unwrap();
        assert!(!summary.success());
        assert_eq!(summary.steps_run, 2);
        assert!(runner.commands().iter().any(|c| c.contains("-o app")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cli_variables_override_everything() {
        let dir = TempDir::new().unwrap();
        write_build_file(dir.path(), TWO_STEP);
        fs::write(dir.path().join("main.cpp"), "").unwrap();

        let runner = FakeRunner::new();
        let mut opts = options(dir.path(), "default");
        opts.build_type = Some("debug".to_string());
        opts.cli_variables = vec![("cc".to_string(), "clang".to_string())];
        let driver = BuildDriver::with_runner(opts, runner.clone());

        driver.run().await.unwrap();
        assert_eq!(
            runner.commands(),
            vec!["clang -O0 -g -c main.cpp", "clang -o app"]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_cli_variable_name_fails() {
        let dir = TempDir::new().unwrap();
        write_build_file(dir.path(), TWO_STEP);

        let mut opts = options(dir.path(), "default");
        opts.cli_variables = vec![("bad name".to_string(), "x".to_string())];
        let driver = BuildDriver::with_runner(opts, FakeRunner::new());
        assert!(matches!(
            driver.run().await,
            Err(BuildError::InvalidVariableName(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_defaults_scope_variables_available() {
        let dir = TempDir::new().unwrap();
        write_build_file(
            dir.path(),
            r#"{
                "version": 1,
                "configurations": [
                    {
                        "name": "default",
                        "buildSteps": [
                            { "name": "announce", "command": "echo ${configName} ${buildTypeName}" }
                        ]
                    }
                ]
            }"#,
        );

        let runner = FakeRunner::new();
        let driver = BuildDriver::with_runner(options(dir.path(), "default"), runner.clone());
        driver.run().await.unwrap();
        assert_eq!(runner.commands(), vec!["echo default "]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_properties_file_feeds_include_paths() {
        let dir = TempDir::new().unwrap();
        write_build_file(
            dir.path(),
            r#"{
                "version": 1,
                "configurations": [
                    {
                        "name": "default",
                        "buildSteps": [
                            { "name": "compile", "command": "cc (-I[$${includePath}]) (-D$${defines})" }
                        ]
                    }
                ]
            }"#,
        );
        fs::write(
            dir.path().join(".vscode/c_cpp_properties.json"),
            r#"{
                "configurations": [
                    {
                        "name": "default",
                        "includePath": ["include", "third_party"],
                        "defines": ["NDEBUG"]
                    }
                ]
            }"#,
        )
        .unwrap();

        let runner = FakeRunner::new();
        let driver = BuildDriver::with_runner(options(dir.path(), "default"), runner.clone());
        driver.run().await.unwrap();
        assert_eq!(
            runner.commands(),
            vec!["cc -Iinclude -Ithird_party -DNDEBUG"]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_disabled_properties_are_not_read() {
        let dir = TempDir::new().unwrap();
        write_build_file(
            dir.path(),
            r#"{
                "version": 1,
                "configurations": [
                    { "name": "default", "buildSteps": [ { "name": "s", "command": "true" } ] }
                ]
            }"#,
        );
        fs::write(dir.path().join(".vscode/c_cpp_properties.json"), "not json").unwrap();

        let mut opts = options(dir.path(), "default");
        opts.properties = PropertiesChoice::Disabled;
        let driver = BuildDriver::with_runner(opts, FakeRunner::new());
        // The malformed file is never touched.
        driver.run().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_explicit_missing_properties_file_fails() {
        let dir = TempDir::new().unwrap();
        write_build_file(
            dir.path(),
            r#"{
                "version": 1,
                "configurations": [
                    { "name": "default", "buildSteps": [] }
                ]
            }"#,
        );

        let mut opts = options(dir.path(), "default");
        opts.properties = PropertiesChoice::Path(dir.path().join("missing.json"));
        let driver = BuildDriver::with_runner(opts, FakeRunner::new());
        assert!(matches!(driver.run().await, Err(BuildError::Io { .. })));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_build_file_fails() {
        let dir = TempDir::new().unwrap();
        let driver = BuildDriver::with_runner(options(dir.path(), "default"), FakeRunner::new());
        assert!(matches!(driver.run().await, Err(BuildError::Io { .. })));
    }
}
