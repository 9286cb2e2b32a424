// lodge-common/src/events.rs
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::LodgeError;
use crate::model::{FetchStrategy, InstallPhase};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallEvent {
    Phase {
        phase: InstallPhase,
    },
    Status {
        message: String,
    },
    Warning {
        message: String,
    },
    Error {
        message: String,
    },
    DownloadStarted {
        strategy: FetchStrategy,
        attempt: u32,
        url: String,
    },
    DownloadProgress {
        received: u64,
        total: Option<u64>,
    },
    DownloadFinished {
        path: PathBuf,
        size_bytes: u64,
    },
    AttemptFailed {
        strategy: FetchStrategy,
        attempt: u32,
        reason: String,
    },
}

impl InstallEvent {
    pub fn status(message: impl Into<String>) -> Self {
        InstallEvent::Status {
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        InstallEvent::Warning {
            message: message.into(),
        }
    }

    pub fn error(error: &LodgeError) -> Self {
        InstallEvent::Error {
            message: error.to_string(),
        }
    }
}

/// Receives byte counts while an artifact streams to disk. Purely
/// observational: implementations must not block or fail the download.
pub trait ProgressSink: Send + Sync {
    fn progress(&self, received: u64, total: Option<u64>);
}

/// The host surface: fire-and-forget status text plus a yes/no capability for
/// human-gated retries.
pub trait Reporter: ProgressSink {
    fn report(&self, event: InstallEvent);

    fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}

/// Discards every event and declines every confirmation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl ProgressSink for NullReporter {
    fn progress(&self, _received: u64, _total: Option<u64>) {}
}

impl Reporter for NullReporter {
    fn report(&self, _event: InstallEvent) {}
}

/// Fans events out over a broadcast channel. Send errors (no subscribers)
/// are ignored.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    event_tx: broadcast::Sender<InstallEvent>,
}

impl ChannelReporter {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<InstallEvent>) {
        let (event_tx, event_rx) = broadcast::channel(capacity);
        (Self { event_tx }, event_rx)
    }
}

impl ProgressSink for ChannelReporter {
    fn progress(&self, received: u64, total: Option<u64>) {
        self.event_tx
            .send(InstallEvent::DownloadProgress { received, total })
            .ok();
    }
}

impl Reporter for ChannelReporter {
    fn report(&self, event: InstallEvent) {
        self.event_tx.send(event).ok();
    }
}
