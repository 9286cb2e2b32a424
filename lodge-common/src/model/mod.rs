// lodge-common/src/model/mod.rs
// Declares the modules within the model directory.
pub mod fetch;
pub mod install;

// Re-export
pub use fetch::{FetchRequest, FetchResult, FetchStrategy, SourceDescriptor};
pub use install::{ExtractionOutcome, InstallPhase, InstallState, RunOutcome, ValidationVerdict};
