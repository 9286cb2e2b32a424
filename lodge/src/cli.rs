// lodge/src/cli.rs
//! Defines the command-line argument structure using clap.
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use lodge_common::error::Result;
use lodge_common::Config;

pub mod install;
pub mod run;
pub mod status;

use crate::cli::install::InstallArgs;
use crate::cli::run::RunArgs;
use crate::cli::status::StatusArgs;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "lodge", bin_name = "lodge")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file (defaults to $LODGE_CONFIG, then ./lodge.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch and unpack the application if it is not installed yet
    Install(InstallArgs),
    /// Install if needed, prepare dependencies and start the application
    Run(RunArgs),
    /// Show whether the application is installed
    Status(StatusArgs),
}

impl Command {
    pub async fn run(&self, config: &Config) -> Result<()> {
        match self {
            Self::Install(command) => command.run(config).await,
            Self::Run(command) => command.run(config).await,
            Self::Status(command) => command.run(config),
        }
    }
}
