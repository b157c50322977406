//! CLI command definitions and handlers.

pub mod ask;
pub mod models;

use clap::{Parser, Subcommand};

/// Image VQA - ask natural-language questions about images
#[derive(Parser)]
#[command(name = "image-vqa")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Shared ask arguments (images, questions, output flags).
    #[command(flatten)]
    pub ask: ask::AskArgs,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Answer questions about images
    Ask(ask::AskArgs),
    /// Manage the cached VQA model
    Models(models::ModelsArgs),
}

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Every image was answered.
    Success = 0,
    /// A run aborted on an error.
    Error = 1,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        Self::from(code as u8)
    }
}
