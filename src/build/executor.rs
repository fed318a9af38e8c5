//! Build Step Executor
//!
//! Runs one build step: fan-out over files with bounded parallelism,
//! sequential iteration over directories, or a single invocation. Each
//! file task forks its own scope stack, checks the incremental skip,
//! optionally trims include paths through the analyser, expands the
//! command and dispatches it through the `CommandRunner`.
//!
//! Cancellation is polled before acquiring a concurrency slot, after
//! acquiring it, before spawning the subprocess, and observed while the
//! subprocess runs.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};

use crate::build::cancel::CancelToken;
use crate::build::process::{CommandRunner, SpawnOptions};
use crate::config::BuildStep;
use crate::errors::{BuildError, Result};
use crate::includes::IncludeAnalyser;
use crate::template::{expand_template, expand_template_single};
use crate::text::{escape, unescape};
use crate::vars::{Resolver, Scope, ScopeStack, Value};
use crate::workspace::{expand_glob, GlobMode};

/// Output-directory creation is process-wide exclusive so parallel
/// tasks cannot race on the same path chain.
static MKDIR_LOCK: Mutex<()> = Mutex::const_new(());

/// Knobs shared by every step of a build.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Concurrency ceiling for per-file tasks.
    pub max_tasks: usize,
    /// Disable the incremental skip check.
    pub force_rebuild: bool,
    /// Count errors instead of cancelling the step.
    pub continue_on_error: bool,
    /// Echo each expanded command line before execution.
    pub debug: bool,
    /// Trim include paths on every step that resolves `includePath`.
    pub trim_include_paths: bool,
    /// Optional per-command timeout.
    pub command_timeout: Option<Duration>,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_tasks: 4,
            force_rebuild: false,
            continue_on_error: false,
            debug: false,
            trim_include_paths: false,
            command_timeout: None,
        }
    }
}

/// Aggregated counters for one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub errors_encountered: usize,
}

impl StepOutcome {
    pub fn absorb(&mut self, other: StepOutcome) {
        self.files_processed += other.files_processed;
        self.files_skipped += other.files_skipped;
        self.errors_encountered += other.errors_encountered;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskResult {
    Processed,
    Skipped,
    Failed,
    Cancelled,
}

/// Serialises task output so each task's lines stay contiguous.
struct LogSink {
    lock: std::sync::Mutex<()>,
}

impl LogSink {
    fn new() -> Self {
        Self {
            lock: std::sync::Mutex::new(()),
        }
    }

    fn emit(&self, stdout: &str, stderr: &str) {
        if stdout.is_empty() && stderr.is_empty() {
            return;
        }
        let _guard = self.lock.lock().ok();
        if !stdout.is_empty() {
            print!("{}", stdout);
            let _ = std::io::stdout().flush();
        }
        if !stderr.is_empty() {
            eprint!("{}", stderr);
            let _ = std::io::stderr().flush();
        }
    }
}

/// Everything a spawned file task needs, cloned per task. Scope layers
/// are `Arc`-shared, so the clone is shallow.
#[derive(Clone)]
struct FileTaskContext {
    root: PathBuf,
    options: ExecutorOptions,
    runner: Arc<dyn CommandRunner>,
    analyser: Arc<IncludeAnalyser>,
    sink: Arc<LogSink>,
    semaphore: Arc<Semaphore>,
    step: Arc<BuildStep>,
    scopes: ScopeStack,
    cli_scope: Scope,
    trim: bool,
    cancel: CancelToken,
}

/// Executes the steps of one build configuration.
pub struct StepExecutor {
    root: PathBuf,
    options: ExecutorOptions,
    runner: Arc<dyn CommandRunner>,
    analyser: Arc<IncludeAnalyser>,
    cli_scope: Scope,
    sink: Arc<LogSink>,
}

impl StepExecutor {
    pub fn new(
        root: PathBuf,
        options: ExecutorOptions,
        runner: Arc<dyn CommandRunner>,
        analyser: Arc<IncludeAnalyser>,
        cli_scope: Scope,
    ) -> Self {
        Self {
            root,
            options,
            runner,
            analyser,
            cli_scope,
            sink: Arc::new(LogSink::new()),
        }
    }

    /// Run one step against the scope stack composed by the driver.
    pub async fn run_step(
        &self,
        step: &BuildStep,
        base: &ScopeStack,
        cancel: &CancelToken,
    ) -> Result<StepOutcome> {
        let mut step_scopes = base.clone();
        if let Some(params) = &step.params {
            step_scopes.push(params.clone());
        }

        if let Some(pattern) = &step.file_pattern {
            let files = self.expand_pattern(pattern, &step_scopes, GlobMode::FilesOnly)?;
            self.run_per_file(step, &step_scopes, files, cancel).await
        } else if let Some(pattern) = &step.directory_pattern {
            let dirs = self.expand_pattern(pattern, &step_scopes, GlobMode::DirectoriesOnly)?;
            self.run_per_directory(step, &step_scopes, dirs, cancel).await
        } else {
            self.run_once(step, &step_scopes, cancel).await
        }
    }

    /// Expand a pattern template, then the resulting glob.
    fn expand_pattern(
        &self,
        template: &str,
        scopes: &ScopeStack,
        mode: GlobMode,
    ) -> Result<Vec<String>> {
        let stack = self.with_cli(scopes);
        let resolver = Resolver::new(&stack, &self.root);
        let pattern = expand_template(template, &resolver)?;
        expand_glob(&self.root, &pattern, mode)
    }

    fn with_cli(&self, scopes: &ScopeStack) -> ScopeStack {
        scopes.layered(self.cli_scope.clone())
    }

    // -- per-file dispatch --

    async fn run_per_file(
        &self,
        step: &BuildStep,
        step_scopes: &ScopeStack,
        files: Vec<String>,
        cancel: &CancelToken,
    ) -> Result<StepOutcome> {
        let trim = step
            .trim_include_paths
            .unwrap_or(self.options.trim_include_paths)
            && self.with_cli(step_scopes).contains("includePath");

        if trim {
            let stack = self.with_cli(step_scopes);
            let resolver = Resolver::new(&stack, &self.root);
            let dirs: Vec<String> = resolver
                .resolve("includePath")?
                .values()
                .iter()
                .map(|v| unescape(v))
                .collect();
            self.analyser.enlist(&dirs).await?;
        }

        let semaphore = Arc::new(Semaphore::new(self.options.max_tasks.max(1)));
        let step = Arc::new(step.clone());
        let mut handles = Vec::with_capacity(files.len());

        for file in files {
            let ctx = FileTaskContext {
                root: self.root.clone(),
                options: self.options.clone(),
                runner: self.runner.clone(),
                analyser: self.analyser.clone(),
                sink: self.sink.clone(),
                semaphore: semaphore.clone(),
                step: step.clone(),
                scopes: step_scopes.clone(),
                cli_scope: self.cli_scope.clone(),
                trim,
                cancel: cancel.clone(),
            };
            handles.push(tokio::spawn(run_file_task(ctx, file)));
        }

        let mut outcome = StepOutcome::default();
        for handle in handles {
            match handle.await {
                Ok(TaskResult::Processed) => outcome.files_processed += 1,
                Ok(TaskResult::Skipped) => outcome.files_skipped += 1,
                Ok(TaskResult::Failed) => outcome.errors_encountered += 1,
                Ok(TaskResult::Cancelled) => {}
                Err(e) => {
                    log::error!("step '{}': task failed: {}", step.name, e);
                    outcome.errors_encountered += 1;
                }
            }
        }
        Ok(outcome)
    }

    // -- per-directory dispatch (sequential) --

    async fn run_per_directory(
        &self,
        step: &BuildStep,
        step_scopes: &ScopeStack,
        dirs: Vec<String>,
        cancel: &CancelToken,
    ) -> Result<StepOutcome> {
        let mut outcome = StepOutcome::default();

        for dir in dirs {
            if cancel.is_cancelled() {
                break;
            }

            let result = self
                .run_single(step, step_scopes, directory_variables(&self.root, &dir), cancel)
                .await;
            match result {
                Ok(TaskResult::Processed) => outcome.files_processed += 1,
                Ok(TaskResult::Cancelled) => break,
                Ok(_) => {}
                Err(e) => {
                    log::error!("step '{}': {}: {}", step.name, unescape(&dir), e);
                    outcome.errors_encountered += 1;
                    if !self.options.continue_on_error {
                        cancel.cancel();
                        break;
                    }
                }
            }
        }
        Ok(outcome)
    }

    // -- once dispatch --

    async fn run_once(
        &self,
        step: &BuildStep,
        step_scopes: &ScopeStack,
        cancel: &CancelToken,
    ) -> Result<StepOutcome> {
        let file_scope = match &step.file_list {
            Some(list) => {
                let files = self.expand_pattern(list, step_scopes, GlobMode::FilesOnly)?;
                file_list_variables(&files)
            }
            None => Scope::new(),
        };

        let mut outcome = StepOutcome::default();
        match self.run_single(step, step_scopes, file_scope, cancel).await {
            Ok(TaskResult::Processed) => outcome.files_processed += 1,
            Ok(_) => {}
            Err(e) => {
                log::error!("step '{}': {}", step.name, e);
                outcome.errors_encountered += 1;
                if !self.options.continue_on_error {
                    cancel.cancel();
                }
            }
        }
        Ok(outcome)
    }

    /// Shared body for directory and once mode: layer the scope, check
    /// forced includes, create the output directory, expand and run.
    async fn run_single(
        &self,
        step: &BuildStep,
        step_scopes: &ScopeStack,
        extra_scope: Scope,
        cancel: &CancelToken,
    ) -> Result<TaskResult> {
        let mut stack = step_scopes.layered(extra_scope);
        stack.push(self.cli_scope.clone());

        check_forced_includes(&stack, &self.root).await?;

        if let Some(template) = &step.output_directory {
            let resolver = Resolver::new(&stack, &self.root);
            let dir = expand_template_single(template, &resolver)?;
            create_dir_guarded(&self.root, &dir).await?;
            stack.push(single_scope("outputDirectory", &dir));
        }

        let resolver = Resolver::new(&stack, &self.root);
        let command = expand_template(&step.command, &resolver)?;
        drop(resolver);

        if cancel.is_cancelled() {
            return Ok(TaskResult::Cancelled);
        }

        dispatch_command(
            &command,
            &self.root,
            &self.options,
            self.runner.as_ref(),
            &self.sink,
            cancel,
        )
        .await
    }
}

// ============================================================================
// File tasks
// ============================================================================

async fn run_file_task(ctx: FileTaskContext, file: String) -> TaskResult {
    // Before acquiring a slot.
    if ctx.cancel.is_cancelled() {
        return TaskResult::Cancelled;
    }

    let permit = match ctx.semaphore.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return TaskResult::Cancelled,
    };

    // Immediately after acquiring it.
    if ctx.cancel.is_cancelled() {
        return TaskResult::Cancelled;
    }

    let result = execute_file(&ctx, &file).await;
    drop(permit);

    match result {
        Ok(task_result) => task_result,
        Err(BuildError::Cancelled) => TaskResult::Cancelled,
        Err(e) => {
            log::error!("step '{}': {}: {}", ctx.step.name, unescape(&file), e);
            if !ctx.options.continue_on_error {
                ctx.cancel.cancel();
            }
            TaskResult::Failed
        }
    }
}

async fn execute_file(ctx: &FileTaskContext, file: &str) -> Result<TaskResult> {
    let raw_file = unescape(file);
    let mut stack = ctx.scopes.layered(file_variables(file));
    stack.push(ctx.cli_scope.clone());

    // Resolve the output file and decide the incremental skip before
    // doing any heavier work.
    let output_file = match &ctx.step.output_file {
        Some(template) => {
            let resolver = Resolver::new(&stack, &ctx.root);
            Some(expand_template_single(template, &resolver)?)
        }
        None => None,
    };

    if let Some(output) = &output_file {
        if !ctx.options.force_rebuild && is_up_to_date(&ctx.root, &raw_file, output).await? {
            log::debug!(
                "step '{}': skipping '{}', output is newer",
                ctx.step.name,
                raw_file
            );
            return Ok(TaskResult::Skipped);
        }
    }

    let forced_seeds = check_forced_includes(&stack, &ctx.root).await?;

    if ctx.trim {
        let mut seeds = vec![absolutise(&ctx.root, &raw_file)];
        seeds.extend(forced_seeds);
        let trimmed = ctx.analyser.get_paths_all(&seeds).await?;
        let mut scope = Scope::new();
        scope.insert(
            "includePath".to_string(),
            Value::Multi(trimmed.iter().map(|p| escape(p)).collect()),
        );
        stack.push(scope);
    }

    if let Some(template) = &ctx.step.output_directory {
        let resolver = Resolver::new(&stack, &ctx.root);
        let dir = expand_template_single(template, &resolver)?;
        create_dir_guarded(&ctx.root, &dir).await?;
        stack.push(single_scope("outputDirectory", &dir));
    }

    if let Some(output) = &output_file {
        if let Some(parent) = Path::new(output).parent() {
            let rendered = parent.display().to_string();
            if !rendered.is_empty() {
                create_dir_guarded(&ctx.root, &rendered).await?;
            }
        }
        stack.push(single_scope("outputFile", output));
    }

    let resolver = Resolver::new(&stack, &ctx.root);
    let command = expand_template(&ctx.step.command, &resolver)?;
    drop(resolver);

    // Before starting the subprocess.
    if ctx.cancel.is_cancelled() {
        return Ok(TaskResult::Cancelled);
    }

    dispatch_command(
        &command,
        &ctx.root,
        &ctx.options,
        ctx.runner.as_ref(),
        &ctx.sink,
        &ctx.cancel,
    )
    .await
}

/// Run the command and emit its output as one contiguous block. A
/// non-zero exit becomes `CommandFailed`.
async fn dispatch_command(
    command: &str,
    root: &Path,
    options: &ExecutorOptions,
    runner: &dyn CommandRunner,
    sink: &LogSink,
    cancel: &CancelToken,
) -> Result<TaskResult> {
    let spawn = SpawnOptions {
        cwd: root.to_path_buf(),
        timeout: options.command_timeout,
    };

    if options.debug {
        log::debug!("> {}", command);
    }

    let result = match runner.run(command, &spawn, cancel).await {
        Ok(result) => result,
        Err(BuildError::Cancelled) => return Ok(TaskResult::Cancelled),
        Err(e) => return Err(e),
    };

    sink.emit(&result.stdout, &result.stderr);

    if result.success() {
        Ok(TaskResult::Processed)
    } else {
        Err(BuildError::CommandFailed(result.exit_code))
    }
}

// ============================================================================
// Scope helpers
// ============================================================================

/// Per-file variables for one matched (escaped) path.
fn file_variables(escaped: &str) -> Scope {
    let raw = unescape(escaped);
    let path = Path::new(&raw);

    let part = |s: Option<&std::ffi::OsStr>| {
        s.map(|p| p.to_string_lossy().to_string()).unwrap_or_default()
    };
    let directory = path
        .parent()
        .map(|p| p.display().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| ".".to_string());

    let mut scope = Scope::new();
    scope.insert("filePath".to_string(), Value::Single(escaped.to_string()));
    scope.insert(
        "fileDirectory".to_string(),
        Value::Single(escape(&directory)),
    );
    scope.insert(
        "fileName".to_string(),
        Value::Single(escape(&part(path.file_stem()))),
    );
    scope.insert(
        "fullFileName".to_string(),
        Value::Single(escape(&part(path.file_name()))),
    );
    scope.insert(
        "fileExtension".to_string(),
        Value::Single(escape(&part(path.extension()))),
    );
    scope
}

/// The same variables as multi-valued sequences for once-mode steps.
fn file_list_variables(escaped_files: &[String]) -> Scope {
    let mut paths = Vec::new();
    let mut directories = Vec::new();
    let mut names = Vec::new();
    let mut full_names = Vec::new();
    let mut extensions = Vec::new();

    for escaped in escaped_files {
        let per_file = file_variables(escaped);
        let take = |name: &str| {
            per_file
                .get(name)
                .and_then(|v| v.as_single())
                .unwrap_or_default()
                .to_string()
        };
        paths.push(take("filePath"));
        directories.push(take("fileDirectory"));
        names.push(take("fileName"));
        full_names.push(take("fullFileName"));
        extensions.push(take("fileExtension"));
    }

    let mut scope = Scope::new();
    scope.insert("filePath".to_string(), Value::Multi(paths));
    scope.insert("fileDirectory".to_string(), Value::Multi(directories));
    scope.insert("fileName".to_string(), Value::Multi(names));
    scope.insert("fullFileName".to_string(), Value::Multi(full_names));
    scope.insert("fileExtension".to_string(), Value::Multi(extensions));
    scope
}

/// Per-directory variables for one matched (escaped) directory.
fn directory_variables(root: &Path, escaped: &str) -> Scope {
    let raw = unescape(escaped);
    let path = Path::new(&raw);
    let full = absolutise(root, &raw);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| raw.clone());

    let mut scope = Scope::new();
    scope.insert(
        "directoryPath".to_string(),
        Value::Single(escaped.to_string()),
    );
    scope.insert(
        "fullDirectoryPath".to_string(),
        Value::Single(escape(&full.display().to_string())),
    );
    scope.insert("directoryName".to_string(), Value::Single(escape(&name)));
    scope
}

fn single_scope(name: &str, value: &str) -> Scope {
    let mut scope = Scope::new();
    scope.insert(name.to_string(), Value::Single(escape(value)));
    scope
}

// ============================================================================
// Filesystem helpers
// ============================================================================

fn absolutise(root: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

/// True when the output exists and is strictly newer than the input.
async fn is_up_to_date(root: &Path, input: &str, output: &str) -> Result<bool> {
    let input_path = absolutise(root, input);
    let output_path = absolutise(root, output);

    let input_meta = tokio::fs::metadata(&input_path)
        .await
        .map_err(|e| BuildError::io("stat", &input_path, e))?;
    let output_meta = match tokio::fs::metadata(&output_path).await {
        Ok(meta) => meta,
        Err(_) => return Ok(false),
    };

    let input_mtime = input_meta
        .modified()
        .map_err(|e| BuildError::io("stat", &input_path, e))?;
    let output_mtime = output_meta
        .modified()
        .map_err(|e| BuildError::io("stat", &output_path, e))?;

    Ok(output_mtime > input_mtime)
}

/// Resolve `forcedInclude` when defined, verify every file exists and
/// return their absolute paths. A missing forced include is a hard
/// error raised before the subprocess launches.
async fn check_forced_includes(stack: &ScopeStack, root: &Path) -> Result<Vec<PathBuf>> {
    if !stack.contains("forcedInclude") {
        return Ok(Vec::new());
    }

    let forced = {
        let resolver = Resolver::new(stack, root);
        resolver.resolve("forcedInclude")?
    };

    let mut seeds = Vec::new();
    for value in forced.values() {
        let raw = unescape(value);
        let path = absolutise(root, &raw);
        let exists = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !exists {
            return Err(BuildError::MissingForcedInclude(raw));
        }
        seeds.push(path);
    }
    Ok(seeds)
}

async fn create_dir_guarded(root: &Path, dir: &str) -> Result<()> {
    let path = absolutise(root, dir);
    let _guard = MKDIR_LOCK.lock().await;
    tokio::fs::create_dir_all(&path)
        .await
        .map_err(|e| BuildError::io("mkdir", &path, e))
}

// ============================================================================
// Tests
// ============================================================================
