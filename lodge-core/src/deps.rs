// lodge-core/src/deps.rs
use std::path::{Path, PathBuf};

use lodge_common::config::DependencyConfig;
use lodge_common::error::{LodgeError, Result};
use tracing::{debug, info};

use crate::process::run_command_async;

/// Prepares the installed application's runtime dependencies. Runs after a
/// successful install and gates the handoff.
#[allow(async_fn_in_trait)]
pub trait DependencyInstaller {
    async fn install(&self, root: &Path) -> Result<()>;
}

/// Shells out to a package manager (`python3 -m pip install` by default).
#[derive(Debug, Clone)]
pub struct CommandDependencyInstaller {
    command: Vec<String>,
    packages: Vec<String>,
    requirements_file: Option<PathBuf>,
}

impl CommandDependencyInstaller {
    pub fn new(
        command: Vec<String>,
        packages: Vec<String>,
        requirements_file: Option<PathBuf>,
    ) -> Self {
        Self {
            command,
            packages,
            requirements_file,
        }
    }

    pub fn from_config(config: &DependencyConfig) -> Self {
        Self::new(
            config.command.clone(),
            config.packages.clone(),
            config.requirements_file.clone(),
        )
    }

    /// Arguments appended to the command, or `None` when there is nothing
    /// to install.
    pub fn plan(&self, root: &Path) -> Option<Vec<String>> {
        let mut args = self.packages.clone();
        if let Some(requirements) = &self.requirements_file {
            let path = root.join(requirements);
            if path.is_file() {
                args.push("-r".to_string());
                args.push(path.to_string_lossy().into_owned());
            }
        }
        (!args.is_empty()).then_some(args)
    }
}

impl DependencyInstaller for CommandDependencyInstaller {
    async fn install(&self, root: &Path) -> Result<()> {
        let Some(extra) = self.plan(root) else {
            debug!("No dependencies to install for {}", root.display());
            return Ok(());
        };
        let Some((program, base)) = self.command.split_first() else {
            return Err(LodgeError::Config(
                "dependencies.command must name a program".to_string(),
            ));
        };

        let args: Vec<String> = base.iter().cloned().chain(extra).collect();
        info!("Installing dependencies: {} {}", program, args.join(" "));
        let output = run_command_async(program, &args, Some(root.to_path_buf())).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(LodgeError::CommandExecError(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )))
    }
}
