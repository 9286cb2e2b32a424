// lodge/src/cli/install.rs
use clap::Args;
use colored::Colorize;
use lodge_common::config::Config;
use lodge_common::error::Result;
use lodge_common::model::FetchStrategy;
use lodge_core::install::{InstallReport, Installer};
use lodge_net::http::HttpTransport;
use tracing::instrument;

use crate::ui::TerminalReporter;

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Override the configured source identifier or URL
    #[arg(long)]
    source: Option<String>,

    /// Strategy to try, in order; repeat to build a list
    #[arg(long = "strategy", value_name = "STRATEGY")]
    strategies: Vec<FetchStrategy>,
}

impl InstallArgs {
    #[instrument(skip(self, config), fields(source = ?self.source))]
    pub async fn run(&self, config: &Config) -> Result<()> {
        let config = self.apply(config);
        let reporter = TerminalReporter::new(false);
        let report = install(&config, &reporter).await?;
        print_report(&report);
        Ok(())
    }

    fn apply(&self, config: &Config) -> Config {
        let mut config = config.clone();
        if let Some(source) = &self.source {
            config.source.id = source.clone();
        }
        if !self.strategies.is_empty() {
            config.strategies = self.strategies.clone();
        }
        config
    }
}

pub(crate) async fn install(config: &Config, reporter: &TerminalReporter) -> Result<InstallReport> {
    let installer = Installer::new(config.clone(), HttpTransport::from_config(config)?);
    installer.install(reporter).await
}

pub(crate) fn print_report(report: &InstallReport) {
    match &report.extraction {
        Some(extraction) if report.fetched => println!(
            "{} {} files into {} ({} attempt(s))",
            "Installed".green().bold(),
            extraction.file_count,
            extraction.root.display(),
            report.attempts
        ),
        _ => println!("{}", "Already installed".green()),
    }
}
