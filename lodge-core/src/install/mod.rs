// lodge-core/src/install/mod.rs
pub mod extract;
pub mod orchestrator;

pub use extract::extract_and_normalize;
pub use orchestrator::{InstallReport, Installer};
