// lodge-core/src/lib.rs
pub mod deps;
pub mod install;
pub mod process;
pub mod run;

pub use deps::{CommandDependencyInstaller, DependencyInstaller};
pub use install::{InstallReport, Installer};
pub use run::{HandoffRunner, LaunchError, LaunchErrorKind, Launcher, ProcessLauncher};
