// lodge-core/src/install/orchestrator.rs
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use lodge_common::config::Config;
use lodge_common::error::{LodgeError, Result};
use lodge_common::events::{InstallEvent, Reporter};
use lodge_common::model::{ExtractionOutcome, FetchResult, InstallPhase, InstallState};
use lodge_net::fetch::{Fetcher, Transport};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::extract;

/// Summary of one orchestration run that reached `Installed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub phase: InstallPhase,
    /// False when the install was already present and nothing was fetched.
    pub fetched: bool,
    pub attempts: u32,
    pub extraction: Option<ExtractionOutcome>,
}

/// Owns the temporary archive path for one run; the file is gone once this
/// drops, whichever way the run ends.
struct TempArchive {
    path: PathBuf,
}

impl TempArchive {
    fn claim(path: PathBuf) -> Result<Self> {
        remove_if_present(&path)?;
        Ok(Self { path })
    }
}

impl Drop for TempArchive {
    fn drop(&mut self) {
        if let Err(e) = remove_if_present(&self.path) {
            warn!(
                "Failed to remove temporary archive {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Drives `NotInstalled → Fetching → Validating → Extracting → Installed`.
///
/// Everything the orchestrator knows comes from the filesystem, so a run
/// interrupted at any point can simply be started again.
pub struct Installer<T> {
    config: Config,
    fetcher: Fetcher<T>,
}

impl<T: Transport> Installer<T> {
    pub fn new(config: Config, transport: T) -> Self {
        Self {
            config,
            fetcher: Fetcher::new(transport),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn fetcher(&self) -> &Fetcher<T> {
        &self.fetcher
    }

    pub fn state(&self) -> InstallState {
        InstallState::probe(&self.config.app_root(), &self.config.entry_point)
    }

    pub async fn install<R: Reporter + ?Sized>(&self, reporter: &R) -> Result<InstallReport> {
        let state = self.state();
        if state.present {
            info!(
                "{} already present, skipping install",
                state.entry_point_path().display()
            );
            reporter.report(InstallEvent::status(format!(
                "Using existing install at {}",
                state.root.display()
            )));
            enter(reporter, InstallPhase::Installed);
            return Ok(InstallReport {
                phase: InstallPhase::Installed,
                fetched: false,
                attempts: 0,
                extraction: None,
            });
        }
        enter(reporter, InstallPhase::NotInstalled);

        match self.fetch_and_extract(reporter).await {
            Ok(report) => {
                enter(reporter, InstallPhase::Installed);
                Ok(report)
            }
            Err(e) => {
                debug!("Install failed: {}", e);
                reporter.report(InstallEvent::error(&e));
                enter(reporter, InstallPhase::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn fetch_and_extract<R: Reporter + ?Sized>(&self, reporter: &R) -> Result<InstallReport> {
        let install_root = self.config.install_root();
        fs::create_dir_all(install_root)?;
        let request = self.config.fetch_request()?;
        let archive = TempArchive::claim(request.destination().to_path_buf())?;

        enter(reporter, InstallPhase::Fetching);
        let (path, attempts) = match self.fetcher.fetch(&request, reporter).await {
            FetchResult::Success {
                path,
                bytes,
                attempts,
            } => {
                debug!("Fetched {} bytes in {} attempt(s)", bytes, attempts);
                (path, attempts)
            }
            FetchResult::Failure { reason, attempts } => {
                return Err(LodgeError::InstallError(format!(
                    "{reason} ({attempts} attempt(s))"
                )));
            }
        };

        enter(reporter, InstallPhase::Extracting);
        let staging = tempfile::Builder::new()
            .prefix(".lodge-staging-")
            .tempdir_in(install_root)?;
        let staged = extract::extract_and_normalize(
            &path,
            staging.path(),
            &self.config.app_folder,
            &self.config.entry_point,
        )?;

        let canonical = self.config.app_root();
        promote(&staged.root, &canonical, reporter)?;
        drop(archive);

        Ok(InstallReport {
            phase: InstallPhase::Installed,
            fetched: true,
            attempts,
            extraction: Some(ExtractionOutcome {
                root: canonical,
                file_count: staged.file_count,
            }),
        })
    }
}

fn enter<R: Reporter + ?Sized>(reporter: &R, phase: InstallPhase) {
    info!("Install phase: {}", phase);
    reporter.report(InstallEvent::Phase { phase });
}

/// Moves the staged root into place with one rename. A leftover canonical
/// directory is cleared if empty and moved aside otherwise; it is restored
/// when the final rename fails.
fn promote<R: Reporter + ?Sized>(staged: &Path, canonical: &Path, reporter: &R) -> Result<()> {
    let mut moved_aside: Option<PathBuf> = None;
    if canonical.exists() {
        if fs::remove_dir(canonical).is_ok() {
            debug!("Removed empty {}", canonical.display());
        } else {
            let aside = stale_path(canonical);
            warn!(
                "Moving incomplete install {} aside to {}",
                canonical.display(),
                aside.display()
            );
            fs::rename(canonical, &aside)?;
            reporter.report(InstallEvent::warning(format!(
                "Moved incomplete install aside to {}",
                aside.display()
            )));
            moved_aside = Some(aside);
        }
    }

    if let Err(e) = fs::rename(staged, canonical) {
        if let Some(aside) = moved_aside {
            if let Err(restore) = fs::rename(&aside, canonical) {
                error!(
                    "Failed to restore {} from {}: {}",
                    canonical.display(),
                    aside.display(),
                    restore
                );
            }
        }
        return Err(LodgeError::InstallError(format!(
            "Failed to move {} into place at {}: {e}",
            staged.display(),
            canonical.display()
        )));
    }
    info!("Installed into {}", canonical.display());
    Ok(())
}

fn stale_path(canonical: &Path) -> PathBuf {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let name = canonical
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut candidate = canonical.with_file_name(format!("{name}.stale-{secs}"));
    let mut n = 1;
    while candidate.exists() {
        candidate = canonical.with_file_name(format!("{name}.stale-{secs}-{n}"));
        n += 1;
    }
    candidate
}
