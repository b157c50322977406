//! Image VQA CLI - visual question answering from the command line.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod output;

use commands::{Cli, Commands, ExitCode};
use config::AppConfig;

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = AppConfig::load();

    let result = match cli.command {
        Some(Commands::Ask(args)) => {
            commands::ask::run(&commands::ask::AskArgs::with_config(args, &config)).map(|_| ())
        }
        Some(Commands::Models(ref args)) => commands::models::run(args, &config),
        // Default behavior: ask with the flattened args
        None => {
            commands::ask::run(&commands::ask::AskArgs::with_config(cli.ask, &config)).map(|_| ())
        }
    };

    let exit_code = match result {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::Error
        }
    };

    exit_code.into()
}
