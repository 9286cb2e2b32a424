// lodge-common/src/lib.rs
pub mod config;
pub mod error;
pub mod events;
pub mod model;

// Re-export key types
pub use config::Config;
pub use error::{LodgeError, Result};
pub use events::{ChannelReporter, InstallEvent, NullReporter, ProgressSink, Reporter};
