mod cli;
mod commands;
mod config;
mod error;
mod logging;
mod utils;

use crate::cli::{Cli, Commands};
use crate::commands::RunOptions;
use crate::error::Result;
use clap::Parser;
use tracing::{debug, error, info};

fn main() {
    if let Err(e) = run_app() {
        eprintln!("\n❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn run_app() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, cli.quiet, cli.log_file.clone())?;

    info!("🚀 XRF Maps CLI v{} starting up.", env!("CARGO_PKG_VERSION"));
    debug!("Full CLI arguments parsed: {:?}", &cli);

    let options = RunOptions {
        threads: cli.threads,
        quiet: cli.quiet,
    };

    let command_result = match cli.command {
        Commands::Fit(args) => {
            info!("Dispatching to 'fit' command.");
            commands::fit::run(args, options)
        }
        Commands::Optimize(args) => {
            info!("Dispatching to 'optimize' command.");
            commands::optimize::run(args, options)
        }
        Commands::Quantify(args) => {
            info!("Dispatching to 'quantify' command.");
            commands::quantify::run(args, options)
        }
    };

    match &command_result {
        Ok(_) => {
            info!("✅ Command completed successfully.");
            println!("✅ Command completed successfully.");
        }
        Err(e) => {
            error!("❌ Command failed: {}", e);
        }
    }

    command_result
}
