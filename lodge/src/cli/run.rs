// lodge/src/cli/run.rs
use clap::Args;
use colored::Colorize;
use lodge_common::config::Config;
use lodge_common::error::{LodgeError, Result};
use lodge_common::events::Reporter;
use lodge_common::model::RunOutcome;
use lodge_core::deps::{CommandDependencyInstaller, DependencyInstaller};
use lodge_core::run::{HandoffRunner, ProcessLauncher};
use tracing::{debug, instrument, warn};

use crate::cli::install::{install, print_report};
use crate::ui::TerminalReporter;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Do not install the application's dependencies before starting it
    #[arg(long)]
    skip_deps: bool,

    /// Never ask to retry a failed install
    #[arg(long)]
    no_prompt: bool,
}

impl RunArgs {
    #[instrument(skip(self, config))]
    pub async fn run(&self, config: &Config) -> Result<()> {
        let reporter = TerminalReporter::new(!self.no_prompt);

        let report = loop {
            match install(config, &reporter).await {
                Ok(report) => break report,
                Err(e) => {
                    if !reporter.confirm(&retry_prompt(&e)) {
                        return Err(e);
                    }
                    debug!("Operator asked to retry the install");
                }
            }
        };
        print_report(&report);

        let root = config.app_root();
        if self.skip_deps {
            debug!("Skipping dependency installation");
        } else {
            CommandDependencyInstaller::from_config(&config.dependencies)
                .install(&root)
                .await?;
        }

        let runner = HandoffRunner::new(ProcessLauncher::from_config(&config.runner));
        match runner.run(&root, &config.entry_point).await {
            RunOutcome::Completed => Ok(()),
            RunOutcome::AlreadyRunning => {
                println!(
                    "{}",
                    "The application is already running, please refresh the page.".yellow()
                );
                Ok(())
            }
            RunOutcome::RuntimeFailure {
                detail,
                missing_dependency,
            } => {
                if let Some(name) = missing_dependency {
                    warn!("Missing dependency reported: {}", name);
                    eprintln!(
                        "{} the application needs '{}'; add it to dependencies.packages or install it with `{} {}`",
                        "Hint:".cyan().bold(),
                        name,
                        config.dependencies.command.join(" "),
                        name
                    );
                }
                Err(LodgeError::RuntimeFailure(detail))
            }
        }
    }
}

fn retry_prompt(error: &LodgeError) -> String {
    format!("Install failed ({error}). Retry the download?")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_prompt_names_the_failure() {
        let prompt = retry_prompt(&LodgeError::LayoutMismatch("no main.py".into()));
        assert!(prompt.contains("Layout mismatch: no main.py"));
        assert!(prompt.ends_with("Retry the download?"));
    }
}
