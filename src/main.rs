//! vcluster e2e harness
//!
//! Connects to a virtual cluster through a local tunnel and checks that
//! workloads can be deployed, scaled and cleaned up.

use std::path::PathBuf;

use clap::Parser;
use vcluster_e2e::cli;
use vcluster_e2e::commands::Commands;
use vcluster_e2e::common::logging;

#[derive(Parser)]
#[command(name = "vcluster-e2e", about = "End-to-end checks for virtual clusters")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Show debug logs and scenario descriptions
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Also write detailed logs, including tunnel output, to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_guard = logging::init_cli(cli.verbose, cli.log_file.as_deref());

    let result = cli::dispatch(cli.command, cli.config.as_deref(), cli.verbose).await;

    // Flush the log file before exit() skips destructors
    drop(log_guard);

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
