//! taskpail CLI.
//!
//! One binary plays every role of a run: the operator compiles and deploys
//! with `up`/`down` and watches with `status`, while the deployed components
//! call back into the same binary (`$TASKPAIL_EXE queue ...`,
//! `worker run`, `workstealer`, `needs`).

use std::error::Error;
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod app;
mod backend;
mod commands;
mod context;
mod worker;

use commands::compile::{CompileArgs, UpArgs};
use commands::needs::NeedsArgs;
use commands::observe::{CpuArgs, LogsArgs, StatusArgs};
use commands::queue::QueueCommand;
use commands::worker::WorkerCommand;
use commands::workstealer::WorkstealerArgs;

#[derive(Parser)]
#[command(name = "taskpail")]
#[command(about = "Queue-driven batch runs on object storage")]
#[command(version)]
struct Cli {
    /// Verbose output
    #[arg(
        short,
        long,
        global = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile specs and print the deployment manifests
    Compile(CompileArgs),

    /// Compile specs and deploy the run
    Up(UpArgs),

    /// Tear down a deployed run
    Down(UpArgs),

    /// Inspect and feed a run's queue
    #[command(subcommand)]
    Queue(QueueCommand),

    /// Pool worker runtime
    #[command(subcommand)]
    Worker(WorkerCommand),

    /// Assign unassigned tasks to worker pools
    Workstealer(WorkstealerArgs),

    /// Prepare a dependency and print its bin directory
    Needs(NeedsArgs),

    /// Live status of a run
    Status(StatusArgs),

    /// CPU and memory of a run's instances
    Cpu(CpuArgs),

    /// Logs of one component of a run
    Logs(LogsArgs),
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // The status view owns the terminal, so its logs go to a file.
    let log_file = match cli.command {
        Commands::Status(_) => Some(std::env::temp_dir().join("taskpail-status.log")),
        _ => None,
    };
    init_tracing(cli.verbose, log_file)?;

    let runtime = tokio::runtime::Runtime::new()?;
    let verbose = cli.verbose;

    match cli.command {
        Commands::Status(args) => commands::observe::status(&runtime, args),
        Commands::Compile(args) => commands::compile::compile(args, verbose),
        Commands::Up(args) => runtime.block_on(commands::compile::up(args, verbose)),
        Commands::Down(args) => runtime.block_on(commands::compile::down(args, verbose)),
        Commands::Queue(cmd) => runtime.block_on(commands::queue::run(cmd)),
        Commands::Worker(cmd) => runtime.block_on(commands::worker::run(cmd)),
        Commands::Workstealer(args) => runtime.block_on(commands::workstealer::run(args)),
        Commands::Needs(args) => runtime.block_on(commands::needs::run(args, verbose)),
        Commands::Cpu(args) => runtime.block_on(commands::observe::cpu(args, verbose)),
        Commands::Logs(args) => runtime.block_on(commands::observe::logs(args)),
    }
}

fn init_tracing(verbose: bool, log_file: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "taskpail={level},taskpail_queue={level},taskpail_status={level},taskpail_compiler={level}"
        ))
    });

    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            tracing_subscriber::fmt()
                .with_writer(std::sync::Mutex::new(file))
                .with_env_filter(filter)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init();
        }
    }
    Ok(())
}
