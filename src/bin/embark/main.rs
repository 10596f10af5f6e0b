//! Embark CLI - meta-build orchestrator for Zephyr-based firmware

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // Parse CLI
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("embark=debug")
    } else {
        EnvFilter::new("embark=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    // Execute command
    match cli.command {
        Commands::Configure(ref args) => commands::configure::execute(&cli, args),
        Commands::Build(ref args) => commands::build::execute(&cli, args),
        Commands::Test(ref args) => commands::test::execute(&cli, args),
        Commands::Testall(ref args) => commands::testall::execute(&cli, args),
        Commands::Completions(ref args) => commands::completions::execute(args),
    }
}
