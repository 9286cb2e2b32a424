// lodge-core/src/process.rs
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::Arc;

use lodge_common::error::{LodgeError, Result};
use tokio::process::Command;
use tracing::{debug, error};

/// Runs an external command to completion and captures its output. The
/// returned `Output` is handed back whatever the exit status.
pub async fn run_command_async(
    command: &str,
    args: &[String],
    cwd: Option<PathBuf>,
) -> Result<Output> {
    debug!("Running command: {} {:?} (cwd: {:?})", command, args, cwd);

    let mut cmd = Command::new(command);
    cmd.args(args);
    cmd.kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null());

    match cmd.output().await {
        Ok(output) => {
            if output.status.success() {
                debug!("Command {} finished successfully.", command);
            } else {
                debug!("Command {} failed with status: {}", command, output.status);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    debug!("Stderr:\n{}", stderr.trim());
                }
            }
            Ok(output)
        }
        Err(e) => {
            error!("Failed to execute {}: {}", command, e);
            Err(LodgeError::Io(Arc::new(e)))
        }
    }
}
