// lodge-core/src/run.rs
//! Hands execution over to the installed application and classifies how it
//! ended.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use lodge_common::config::{RunnerConfig, ENTRY_PLACEHOLDER, FUNCTION_PLACEHOLDER};
use lodge_common::model::RunOutcome;
use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Environment variable naming the function the entry point should invoke.
pub const ENTRY_FUNCTION_ENV: &str = "LODGE_ENTRY_FUNCTION";

const STDERR_TAIL_LINES: usize = 200;

static MISSING_MODULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"No module named ['"]?([A-Za-z0-9_]+)"#).expect("valid module pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchErrorKind {
    /// The host surface was already configured by an instance that is still
    /// running.
    AlreadyConfigured,
    MissingDependency(String),
    Other,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{detail}")]
pub struct LaunchError {
    pub kind: LaunchErrorKind,
    pub detail: String,
}

impl LaunchError {
    pub fn new(kind: LaunchErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Maps free-form failure text from the host to an error kind. The
    /// marker wins over a dependency hint.
    pub fn classify(detail: impl Into<String>, already_running_marker: &str) -> Self {
        let detail = detail.into();
        let kind = if !already_running_marker.is_empty() && detail.contains(already_running_marker)
        {
            LaunchErrorKind::AlreadyConfigured
        } else if let Some(name) = missing_module(&detail) {
            LaunchErrorKind::MissingDependency(name)
        } else {
            LaunchErrorKind::Other
        };
        Self { kind, detail }
    }
}

/// Best effort; only the top-level package name is returned.
pub fn missing_module(detail: &str) -> Option<String> {
    MISSING_MODULE_RE
        .captures(detail)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Loads the entry point found under `root` and invokes it.
#[allow(async_fn_in_trait)]
pub trait Launcher {
    async fn launch(&self, root: &Path, entry_point: &Path) -> Result<(), LaunchError>;
}

/// Runs the entry point with an external interpreter. The default arguments
/// load the entry point as a module and call the entry function. Stdout is
/// inherited; stderr is echoed through and its tail kept for classification.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    interpreter: String,
    args: Vec<String>,
    entry_function: String,
    already_running_marker: String,
}

impl ProcessLauncher {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self::from_config(&RunnerConfig {
            interpreter: interpreter.into(),
            ..RunnerConfig::default()
        })
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            args: config.args.clone(),
            entry_function: config.entry_function.clone(),
            already_running_marker: config.already_running_marker.clone(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Interpreter arguments with the placeholders filled in.
    pub fn command_args(&self, entry_point: &Path) -> Vec<String> {
        let entry = entry_point.to_string_lossy();
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.replace(ENTRY_PLACEHOLDER, &entry)
                    .replace(FUNCTION_PLACEHOLDER, &self.entry_function)
            })
            .collect();
        if !self.args.iter().any(|arg| arg.contains(ENTRY_PLACEHOLDER)) {
            args.push(entry.into_owned());
        }
        args
    }
}

impl Launcher for ProcessLauncher {
    async fn launch(&self, root: &Path, entry_point: &Path) -> Result<(), LaunchError> {
        let args = self.command_args(entry_point);
        let mut cmd = Command::new(&self.interpreter);
        cmd.args(&args)
            .current_dir(root)
            .env(ENTRY_FUNCTION_ENV, &self.entry_function)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(
            "Launching {} {:?} in {}",
            self.interpreter,
            args,
            root.display()
        );

        let mut child = cmd.spawn().map_err(|e| {
            LaunchError::new(
                LaunchErrorKind::Other,
                format!("Failed to start {}: {e}", self.interpreter),
            )
        })?;

        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            let mut echo = tokio::io::stderr();
            while let Ok(Some(line)) = lines.next_line().await {
                echo.write_all(line.as_bytes()).await.ok();
                echo.write_all(b"\n").await.ok();
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }

        let status = child.wait().await.map_err(|e| {
            LaunchError::new(
                LaunchErrorKind::Other,
                format!("Failed to wait for {}: {e}", self.interpreter),
            )
        })?;
        if status.success() {
            return Ok(());
        }

        let stderr_text = Vec::from(tail).join("\n");
        let detail = if stderr_text.trim().is_empty() {
            format!("{} exited with {}", entry_point.display(), status)
        } else {
            format!(
                "{} exited with {}: {}",
                entry_point.display(),
                status,
                stderr_text.trim()
            )
        };
        Err(LaunchError::classify(detail, &self.already_running_marker))
    }
}

#[derive(Debug, Clone)]
pub struct HandoffRunner<L> {
    launcher: L,
}

impl<L: Launcher> HandoffRunner<L> {
    pub fn new(launcher: L) -> Self {
        Self { launcher }
    }

    pub async fn run(&self, root: &Path, entry_point: &Path) -> RunOutcome {
        let entry_path: PathBuf = root.join(entry_point);
        if !entry_path.is_file() {
            error!("Entry point {} is missing", entry_path.display());
            return RunOutcome::RuntimeFailure {
                detail: format!("Entry point {} does not exist", entry_path.display()),
                missing_dependency: None,
            };
        }

        info!("Handing off to {}", entry_path.display());
        match self.launcher.launch(root, entry_point).await {
            Ok(()) => RunOutcome::Completed,
            Err(LaunchError {
                kind: LaunchErrorKind::AlreadyConfigured,
                detail,
            }) => {
                debug!("Application already running: {}", detail);
                RunOutcome::AlreadyRunning
            }
            Err(LaunchError { kind, detail }) => {
                let missing_dependency = match kind {
                    LaunchErrorKind::MissingDependency(name) => Some(name),
                    _ => missing_module(&detail),
                };
                warn!("Application failed: {}", detail);
                RunOutcome::RuntimeFailure {
                    detail,
                    missing_dependency,
                }
            }
        }
    }
}
