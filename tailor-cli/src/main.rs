mod cli;
mod commands;
mod error;

use std::process;

use clap::Parser;
use tracing::{Level, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::{Args, Commands, LogFormat},
    error::{AppError, Result},
};

#[tokio::main]
async fn main() {
    // Optional .env next to the invocation; real environment wins.
    dotenvy::dotenv().ok();

    let args = Args::parse();
    if let Err(e) = init_logging(args.verbose, args.quiet, args.log_format) {
        eprintln!("Error: {e}");
        process::exit(1);
    }

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Commands::PoolTick(tick) => commands::pool_tick(tick).await,
        Commands::PrefetchTick(tick) => commands::prefetch_tick(tick).await,
        Commands::Shard(shard) => commands::shard(shard),
    }
}

/// Logs go to stderr; stdout carries only the state JSON.
fn init_logging(verbose: bool, quiet: bool, format: LogFormat) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::INFO.into()))
    };

    let subscriber = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => subscriber
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    }
    .map_err(|e| AppError::Logging(e.to_string()))
}
