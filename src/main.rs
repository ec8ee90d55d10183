use std::collections::HashMap;
use std::path::PathBuf;

/// Reset SIGPIPE to default behavior so piping interpreter output exits
/// cleanly instead of panicking on broken pipe.
#[cfg(unix)]
fn reset_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use nimbus::interp::{Interpreter, RunInfo};
use nimbus::program::Program;

/// nimbus - interpreter for declarative cloud programs
#[derive(Parser)]
#[command(name = "nimbus", version, about, long_about = None)]
struct Cli {
    /// Path to the parsed program (JSON)
    program: PathBuf,

    /// Project name
    #[arg(long)]
    project: String,

    /// Stack name
    #[arg(long)]
    stack: String,

    /// Organization name
    #[arg(long, default_value = "organization")]
    organization: String,

    /// Project root directory
    #[arg(long, default_value = ".")]
    root_directory: PathBuf,

    /// Directory containing the program source
    #[arg(long)]
    program_dir: Option<PathBuf>,

    /// Working directory relative paths resolve against
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Resource monitor address (host:port)
    #[arg(long)]
    monitor: String,

    /// Engine address (host:port)
    #[arg(long)]
    engine: String,

    /// Schema loader address (host:port)
    #[arg(long)]
    loader: String,

    /// JSON file with config values and secret key names
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Preview only; the monitor leaves unknowns unresolved
    #[arg(long)]
    dry_run: bool,

    /// Maximum number of nodes in flight
    #[arg(short, long, default_value = "10")]
    parallel: i32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// The config file the driver writes: raw values plus the keys it knows
/// to be secret.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    config: HashMap<String, String>,
    #[serde(default, rename = "configSecretKeys")]
    config_secret_keys: Vec<String>,
}

#[tokio::main]
async fn main() {
    #[cfg(unix)]
    reset_sigpipe();

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(error) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), error);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let source = std::fs::read_to_string(&cli.program)
        .with_context(|| format!("Failed to read program: {}", cli.program.display()))?;
    let program: Program = serde_json::from_str(&source)
        .with_context(|| format!("Failed to parse program: {}", cli.program.display()))?;

    let config_file = match &cli.config_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        }
        None => ConfigFile::default(),
    };

    let root_directory = cli.root_directory.clone();
    let run_info = RunInfo {
        project: cli.project,
        stack: cli.stack,
        organization: cli.organization,
        program_dir: cli.program_dir.unwrap_or_else(|| root_directory.clone()),
        working_dir: cli.working_dir.unwrap_or_else(|| root_directory.clone()),
        root_directory,
        config: config_file.config,
        config_secrets: config_file.config_secret_keys,
        monitor_address: cli.monitor,
        engine_address: cli.engine,
        loader_address: cli.loader,
        dry_run: cli.dry_run,
        parallel: cli.parallel,
    };

    let interpreter = Interpreter::connect(run_info, program).await?;

    // Ctrl-C cancels the run context; outstanding RPCs abort and the
    // walker stops scheduling.
    let ctx = interpreter.context();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctx.cancel();
        }
    });

    interpreter.run().await
}
