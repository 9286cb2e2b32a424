// lodge/src/cli/status.rs
use clap::Args;
use colored::Colorize;
use lodge_common::config::Config;
use lodge_common::error::Result;
use lodge_common::model::InstallState;

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Print the probed state as JSON
    #[arg(long)]
    json: bool,
}

impl StatusArgs {
    pub fn run(&self, config: &Config) -> Result<()> {
        let state = InstallState::probe(&config.app_root(), &config.entry_point);
        if self.json {
            println!("{}", serde_json::to_string_pretty(&state)?);
            return Ok(());
        }
        let label = if state.present {
            "installed".green().bold()
        } else {
            "not installed".yellow().bold()
        };
        println!("{:<12} {}", "Status:", label);
        println!("{:<12} {}", "Root:", state.root.display());
        println!("{:<12} {}", "Entry point:", state.entry_point_path().display());
        println!("{:<12} {}", "Source:", config.source.id);
        Ok(())
    }
}
