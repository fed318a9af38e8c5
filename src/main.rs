use clap::Parser;
use std::path::PathBuf;

use cppbuild::build::{BuildDriver, BuildOptions, ExecutorOptions, PropertiesChoice};
use cppbuild::config::sample;

#[derive(Parser)]
#[command(name = "cppbuild")]
#[command(about = "Multi-step incremental build driver for C/C++ projects")]
#[command(version)]
struct Cli {
    /// Build configuration to run
    #[arg()]
    config_name: Option<String>,

    /// Build type within the configuration (e.g. debug, release)
    #[arg()]
    build_type: Option<String>,

    /// Workspace root for relative paths; defaults to the current directory
    #[arg(short = 'w', long = "workspace-root", num_args = 0..=1, default_missing_value = ".")]
    workspace_root: Option<String>,

    /// Build-steps file; defaults to .vscode/c_cpp_build.json under the root
    #[arg(short = 'b', long = "build-file")]
    build_file: Option<String>,

    /// C/C++ properties file; pass the flag without a value to disable it
    #[arg(short = 'p', long = "properties-file", num_args = 0..=1, default_missing_value = "")]
    properties_file: Option<String>,

    /// Define a variable as name=value; repeatable
    #[arg(short = 'v', long = "variable")]
    variables: Vec<String>,

    /// Maximum number of concurrent file tasks
    #[arg(short = 'j', long = "max-tasks", default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    max_tasks: u16,

    /// Run every command even when outputs are up to date
    #[arg(short = 'f', long = "force-rebuild")]
    force_rebuild: bool,

    /// Emit each command line before execution
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Trim include paths to those each translation unit needs
    #[arg(short = 't', long = "trim-include-paths")]
    trim_include_paths: bool,

    /// Keep going after a failing command
    #[arg(short = 'c', long = "continue-on-error")]
    continue_on_error: bool,

    /// Write a sample build file to the given path and exit
    #[arg(short = 'i', long = "initialize")]
    initialize: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .init();

    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    if let Some(target) = &cli.initialize {
        return match sample::write_sample(std::path::Path::new(target)) {
            Ok(path) => {
                log::info!("sample build file written to '{}'", path.display());
                0
            }
            Err(e) => {
                log::error!("{}", e);
                1
            }
        };
    }

    let Some(config_name) = cli.config_name.clone() else {
        log::error!("no build configuration given; pass a configuration name or --initialize");
        return 1;
    };

    let mut variables = Vec::with_capacity(cli.variables.len());
    for pair in &cli.variables {
        match pair.split_once('=') {
            Some((name, value)) => variables.push((name.to_string(), value.to_string())),
            None => {
                log::error!("variable '{}' is not of the form name=value", pair);
                return 1;
            }
        }
    }

    let workspace_root = match &cli.workspace_root {
        Some(path) => PathBuf::from(path),
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                log::error!("cannot determine the current directory: {}", e);
                return 1;
            }
        },
    };

    let properties = match &cli.properties_file {
        None => PropertiesChoice::Default,
        Some(path) if path.is_empty() => PropertiesChoice::Disabled,
        Some(path) => PropertiesChoice::Path(PathBuf::from(path)),
    };

    let options = BuildOptions {
        workspace_root,
        build_file: cli.build_file.as_ref().map(PathBuf::from),
        properties,
        configuration: config_name,
        build_type: cli.build_type.clone(),
        cli_variables: variables,
        executor: ExecutorOptions {
            max_tasks: cli.max_tasks as usize,
            force_rebuild: cli.force_rebuild,
            continue_on_error: cli.continue_on_error,
            debug: cli.debug,
            trim_include_paths: cli.trim_include_paths,
            command_timeout: None,
        },
    };

    match BuildDriver::new(options).run().await {
        Ok(summary) => {
            log::info!(
                "build finished in {:.1}s: filesProcessed: {}, filesSkipped: {}, errorsEncountered: {}",
                summary.elapsed.as_secs_f64(),
                summary.totals.files_processed,
                summary.totals.files_skipped,
                summary.totals.errors_encountered
            );
            if summary.success() {
                0
            } else {
                1
            }
        }
        Err(e) => {
            log::error!("{}", e);
            1
        }
    }
}
