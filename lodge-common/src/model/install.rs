// lodge-common/src/model/install.rs
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Classification of a downloaded file, computed once from its size and prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationVerdict {
    ValidArchive,
    EmptyPayload,
    UnexpectedContent { preview: String },
}

impl ValidationVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationVerdict::ValidArchive)
    }
}

impl fmt::Display for ValidationVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationVerdict::ValidArchive => f.write_str("valid archive"),
            ValidationVerdict::EmptyPayload => f.write_str("empty payload"),
            ValidationVerdict::UnexpectedContent { preview } => {
                write!(f, "unexpected content ({})", preview.trim())
            }
        }
    }
}

/// What the filesystem says about the install right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallState {
    pub root: PathBuf,
    pub entry_point: PathBuf,
    pub present: bool,
}

impl InstallState {
    /// Probes `root/entry_point`. The entry-point file is the only durable
    /// signal that a previous run finished.
    pub fn probe(root: &Path, entry_point: &Path) -> Self {
        let present = root.join(entry_point).is_file();
        Self {
            root: root.to_path_buf(),
            entry_point: entry_point.to_path_buf(),
            present,
        }
    }

    pub fn entry_point_path(&self) -> PathBuf {
        self.root.join(&self.entry_point)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub root: PathBuf,
    pub file_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallPhase {
    NotInstalled,
    Fetching,
    Validating,
    Extracting,
    Installed,
    Failed(String),
}

impl InstallPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstallPhase::Installed | InstallPhase::Failed(_))
    }
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallPhase::NotInstalled => f.write_str("not installed"),
            InstallPhase::Fetching => f.write_str("fetching"),
            InstallPhase::Validating => f.write_str("validating"),
            InstallPhase::Extracting => f.write_str("extracting"),
            InstallPhase::Installed => f.write_str("installed"),
            InstallPhase::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Completed,
    /// The host surface was already configured by another instance; the
    /// operator only needs to refresh.
    AlreadyRunning,
    RuntimeFailure {
        detail: String,
        missing_dependency: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_reflects_entry_point_presence() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("app");
        let state = InstallState::probe(&root, Path::new("main.py"));
        assert!(!state.present);

        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("main.py"), "print('hi')").unwrap();
        let state = InstallState::probe(&root, Path::new("main.py"));
        assert!(state.present);
        assert_eq!(state.entry_point_path(), root.join("main.py"));
    }

    #[test]
    fn directory_named_like_entry_point_is_not_an_install() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("main.py")).unwrap();
        assert!(!InstallState::probe(dir.path(), Path::new("main.py")).present);
    }

    #[test]
    fn verdict_display_trims_preview() {
        let verdict = ValidationVerdict::UnexpectedContent {
            preview: "  <html>\n".to_string(),
        };
        assert_eq!(verdict.to_string(), "unexpected content (<html>)");
        assert!(!verdict.is_valid());
    }
}
