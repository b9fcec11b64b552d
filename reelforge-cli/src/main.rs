//! ReelForge CLI.
//!
//! Command surface over the production pipeline:
//! - `run-once`: one discovery pass, drain, exit
//! - `run-loop`: continuous supervision with the daily production pass
//! - `reset <item_id>`: re-enter a failed item at its last good state
//! - `status`: pipeline health snapshot
//! - `gc`: one retention sweep over terminal items
//!
//! Exit codes: 0 success, 2 configuration error, 3 unrecoverable runtime
//! error, 130 terminated by signal.

mod error;
mod runner;

use clap::{Parser, Subcommand};
use error::{CliError, EXIT_SIGNAL};
use reelforge::supervisor::Supervisor;
use runner::CliRunner;

#[derive(Parser)]
#[command(name = "reelforge")]
#[command(version = reelforge::VERSION)]
#[command(about = "Autonomous short-form video production pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single production pass and drain
    RunOnce,

    /// Run continuous supervision with the daily schedule
    RunLoop,

    /// Reset a failed item to its last successful state
    Reset {
        /// The item to reset
        item_id: String,
    },

    /// Show pipeline health
    Status,

    /// Run one artifact garbage collection pass
    Gc,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::RunOnce => run_once().await,
        Commands::RunLoop => run_loop().await,
        Commands::Reset { item_id } => run_reset(&item_id).await,
        Commands::Status => run_status().await,
        Commands::Gc => run_gc().await,
    };

    if let Err(e) = result {
        e.exit();
    }
}

async fn run_once() -> Result<(), CliError> {
    let runner = CliRunner::new()?;
    let shutdown = runner.shutdown_on_signals();
    let supervisor = Supervisor::bootstrap(runner.settings()).await?;
    let interrupted = shutdown.clone();
    supervisor.run_once(shutdown).await?;
    if interrupted.is_cancelled() {
        std::process::exit(EXIT_SIGNAL);
    }
    Ok(())
}

async fn run_loop() -> Result<(), CliError> {
    let runner = CliRunner::new()?;
    let shutdown = runner.shutdown_on_signals();
    let supervisor = Supervisor::bootstrap(runner.settings()).await?;
    supervisor.run_loop(shutdown).await?;
    // The loop only returns after a shutdown signal
    std::process::exit(EXIT_SIGNAL);
}

async fn run_reset(item_id: &str) -> Result<(), CliError> {
    let runner = CliRunner::new()?;
    let supervisor = Supervisor::bootstrap(runner.settings()).await?;
    supervisor.reset_item(item_id).await?;
    println!("reset {}", item_id);
    Ok(())
}

async fn run_status() -> Result<(), CliError> {
    let runner = CliRunner::new()?;
    let supervisor = Supervisor::bootstrap(runner.settings()).await?;
    print!("{}", supervisor.health().render());
    Ok(())
}

async fn run_gc() -> Result<(), CliError> {
    let runner = CliRunner::new()?;
    let supervisor = Supervisor::bootstrap(runner.settings()).await?;
    let report = supervisor.collect_garbage().await?;
    println!(
        "swept {} items ({} bytes), removed {} orphaned temp files, {} busy items skipped",
        report.items_swept,
        report.bytes_reclaimed,
        report.temp_files_removed,
        report.items_skipped_busy
    );
    Ok(())
}
