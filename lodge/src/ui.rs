// lodge/src/ui.rs
//! Terminal rendering of install events.

use std::io::IsTerminal;
use std::sync::Mutex;
use std::time::Duration;

use colored::Colorize;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use lodge_common::events::{InstallEvent, ProgressSink, Reporter};
use lodge_common::model::InstallPhase;

const BYTES_TEMPLATE: &str =
    "{spinner:.blue.bold} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.blue.bold} {bytes} {msg}";

/// Creates and configures a default spinner ProgressBar.
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue.bold} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn download_bar(total: Option<u64>) -> ProgressBar {
    let (pb, template) = match total {
        Some(len) => (ProgressBar::new(len), BYTES_TEMPLATE),
        None => (ProgressBar::new_spinner(), SPINNER_TEMPLATE),
    };
    if let Ok(style) = ProgressStyle::with_template(template) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Prints status lines and drives a download progress bar. Confirmations
/// are only asked when stdin is a terminal.
pub struct TerminalReporter {
    bar: Mutex<Option<ProgressBar>>,
    interactive: bool,
}

impl TerminalReporter {
    pub fn new(allow_prompts: bool) -> Self {
        Self {
            bar: Mutex::new(None),
            interactive: allow_prompts && std::io::stdin().is_terminal(),
        }
    }

    fn println(&self, line: String) {
        match self.bar.lock().ok().as_ref().and_then(|bar| bar.as_ref()) {
            Some(bar) => bar.println(line),
            None => eprintln!("{line}"),
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut bar) = self.bar.lock() {
            if let Some(bar) = bar.take() {
                bar.finish_and_clear();
            }
        }
    }

    fn start_spinner(&self, message: &str) {
        self.finish_bar();
        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(create_spinner(message));
        }
    }
}

/// The status line printed when the install enters `phase`, if any.
/// Extraction shows a spinner instead, and a failure is left to the
/// command's error output.
fn phase_line(phase: &InstallPhase) -> Option<String> {
    match phase {
        InstallPhase::Installed => Some(format!("{} {}", "✓".green().bold(), "Installed".green())),
        InstallPhase::Failed(_) | InstallPhase::Extracting => None,
        InstallPhase::NotInstalled => Some(format!("{} Not installed yet", "·".dimmed())),
        other => Some(format!("{} {}", "→".cyan(), other)),
    }
}

impl ProgressSink for TerminalReporter {
    fn progress(&self, received: u64, total: Option<u64>) {
        let Ok(mut slot) = self.bar.lock() else {
            return;
        };
        let bar = slot.get_or_insert_with(|| download_bar(total));
        if let Some(len) = total {
            if bar.length() != Some(len) {
                bar.set_length(len);
            }
        }
        bar.set_position(received);
    }
}

impl Reporter for TerminalReporter {
    fn report(&self, event: InstallEvent) {
        match event {
            InstallEvent::Phase { phase } => {
                if phase.is_terminal() {
                    self.finish_bar();
                } else if phase == InstallPhase::Extracting {
                    self.start_spinner("Extracting archive");
                }
                if let Some(line) = phase_line(&phase) {
                    self.println(line);
                }
            }
            InstallEvent::Status { message } => self.println(message),
            InstallEvent::Warning { message } => {
                self.println(format!("{} {}", "Warning:".yellow().bold(), message))
            }
            // Failures reach the operator through the command's own error path.
            InstallEvent::Error { .. } => {}
            InstallEvent::DownloadStarted {
                strategy,
                attempt,
                url,
            } => {
                self.println(format!(
                    "{} Downloading via {} (attempt {}) {}",
                    "↓".yellow(),
                    strategy.to_string().bold(),
                    attempt,
                    url.dimmed()
                ));
                if let Ok(slot) = self.bar.lock() {
                    if let Some(bar) = slot.as_ref() {
                        bar.reset();
                        bar.set_message(strategy.to_string());
                    }
                }
            }
            InstallEvent::DownloadProgress { received, total } => self.progress(received, total),
            InstallEvent::DownloadFinished { size_bytes, .. } => {
                self.finish_bar();
                self.println(format!(
                    "{} Downloaded {} bytes",
                    "✓".green(),
                    size_bytes
                ));
            }
            InstallEvent::AttemptFailed {
                strategy,
                attempt,
                reason,
            } => {
                if let Ok(slot) = self.bar.lock() {
                    if let Some(bar) = slot.as_ref() {
                        bar.set_position(0);
                    }
                }
                self.println(format!(
                    "{} {} attempt {} failed: {}",
                    "!".yellow().bold(),
                    strategy,
                    attempt,
                    reason.yellow()
                ));
            }
        }
    }

    fn confirm(&self, prompt: &str) -> bool {
        if !self.interactive {
            return false;
        }
        self.finish_bar();
        Confirm::new()
            .with_prompt(prompt)
            .default(true)
            .interact()
            .unwrap_or(false)
    }
}
