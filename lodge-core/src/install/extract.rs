// lodge-core/src/install/extract.rs
use std::fs::{self, File};
use std::io::{self, Read, Seek};
#[cfg(unix)]
use std::os::unix::fs as unix_fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use lodge_common::error::{LodgeError, Result};
use lodge_common::model::ExtractionOutcome;
use tracing::{debug, error, info};
use walkdir::WalkDir;
use zip::read::ZipArchive;

/// Expands `archive` into `work_dir`, then makes sure the application lives
/// under `work_dir/expected_root` with `entry_point` inside it.
pub fn extract_and_normalize(
    archive: &Path,
    work_dir: &Path,
    expected_root: &str,
    entry_point: &Path,
) -> Result<ExtractionOutcome> {
    extract_zip(archive, work_dir)?;
    let root = normalize_layout(work_dir, expected_root, entry_point)?;
    let file_count = count_files(&root);
    info!(
        "Extracted {} file(s) into {}",
        file_count,
        root.display()
    );
    Ok(ExtractionOutcome { root, file_count })
}

pub fn extract_zip(archive_path: &Path, target_dir: &Path) -> Result<()> {
    debug!(
        "Extracting ZIP '{}' to '{}'",
        archive_path.display(),
        target_dir.display()
    );
    fs::create_dir_all(target_dir).map_err(|e| {
        io_context(e, format!("Failed to create target directory {}", target_dir.display()))
    })?;
    let file = File::open(archive_path)
        .map_err(|e| io_context(e, format!("Failed to open archive {}", archive_path.display())))?;
    extract_zip_archive(file, target_dir, archive_path)
}

fn extract_zip_archive<R: Read + Seek>(
    reader: R,
    target_dir: &Path,
    archive_path_for_log: &Path,
) -> Result<()> {
    let bad = |detail: String| {
        LodgeError::BadArchive(archive_path_for_log.display().to_string(), detail)
    };
    let mut archive = ZipArchive::new(reader).map_err(|e| bad(e.to_string()))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| bad(format!("entry {i}: {e}")))?;

        let relative = match file.enclosed_name() {
            Some(p) => p,
            None => {
                error!("Unsafe ZIP entry name {}", file.name());
                return Err(bad(format!("unsafe entry path '{}'", file.name())));
            }
        };
        let target = safe_join(target_dir, &relative)
            .ok_or_else(|| bad(format!("unsafe entry path '{}'", relative.display())))?;
        if target == target_dir {
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| io_context(e, format!("Failed create dir {}", parent.display())))?;
        }

        if file.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| io_context(e, format!("Failed create dir {}", target.display())))?;
        } else if file.is_symlink() {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)
                .map_err(|e| bad(format!("symlink {}: {e}", relative.display())))?;
            let link_target = PathBuf::from(String::from_utf8_lossy(&buf).into_owned());
            #[cfg(unix)]
            {
                if target.symlink_metadata().is_ok() {
                    let _ = fs::remove_file(&target);
                }
                unix_fs::symlink(&link_target, &target).map_err(|e| {
                    io_context(
                        e,
                        format!(
                            "Failed to create symlink {} -> {}",
                            target.display(),
                            link_target.display()
                        ),
                    )
                })?;
            }
            #[cfg(not(unix))]
            {
                tracing::warn!(
                    "Cannot create symlink on non-unix system: {} -> {}",
                    target.display(),
                    link_target.display()
                );
            }
        } else {
            match fs::remove_file(&target) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            let mut out = File::create(&target)
                .map_err(|e| io_context(e, format!("Failed create file {}", target.display())))?;
            // Decompression and CRC failures surface here as io errors.
            io::copy(&mut file, &mut out)
                .map_err(|e| bad(format!("entry {}: {e}", relative.display())))?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                if !file.is_symlink() && target.is_file() {
                    fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
                }
            }
        }
    }
    debug!("Finished ZIP extraction for {}", archive_path_for_log.display());
    Ok(())
}

fn safe_join(base: &Path, relative: &Path) -> Option<PathBuf> {
    let mut out = base.to_path_buf();
    for comp in relative.components() {
        match comp {
            Component::Normal(p) => out.push(p),
            Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) | Component::RootDir => return None,
        }
    }
    Some(out)
}

/// Resolves the application root inside `work_dir`.
///
/// When `expected_root/entry_point` already exists nothing moves. Otherwise
/// the first top-level directory (by name) holding `entry_point` is renamed
/// to `expected_root`; an empty `expected_root` left by the archive is
/// removed first so the rename can land. The rename is the only mutation.
pub fn normalize_layout(work_dir: &Path, expected_root: &str, entry_point: &Path) -> Result<PathBuf> {
    let canonical = work_dir.join(expected_root);
    if canonical.join(entry_point).is_file() {
        debug!("Canonical layout already present at {}", canonical.display());
        return Ok(canonical);
    }

    let mut candidates: Vec<PathBuf> = fs::read_dir(work_dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|entry| entry.file_name() != expected_root)
        .map(|entry| entry.path())
        .collect();
    candidates.sort();

    let Some(found) = candidates
        .into_iter()
        .find(|dir| dir.join(entry_point).is_file())
    else {
        return Err(LodgeError::LayoutMismatch(format!(
            "no top-level directory in the archive contains {}",
            entry_point.display()
        )));
    };

    if canonical.exists() {
        // Anything non-empty here would be silently shadowed; refuse instead.
        fs::remove_dir(&canonical).map_err(|e| {
            LodgeError::LayoutMismatch(format!(
                "{} exists without {} and could not be cleared: {e}",
                canonical.display(),
                entry_point.display()
            ))
        })?;
    }

    info!(
        "Renaming {} to {}",
        found.display(),
        canonical.display()
    );
    fs::rename(&found, &canonical)
        .map_err(|e| io_context(e, format!("Failed to rename {}", found.display())))?;
    Ok(canonical)
}

pub fn count_files(root: &Path) -> usize {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .count()
}

fn io_context(e: io::Error, context: String) -> LodgeError {
    LodgeError::Io(Arc::new(io::Error::new(e.kind(), format!("{context}: {e}"))))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use super::*;

    /// Writes a ZIP with the given `(path, contents)` entries; a trailing
    /// `/` makes a directory entry.
    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        for (name, contents) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, options).unwrap();
            } else {
                zip.start_file(*name, options).unwrap();
                zip.write_all(contents.as_bytes()).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    #[test]
    fn canonical_layout_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        write_zip(
            &archive,
            &[
                ("lifecheck/main.py", "print()"),
                ("lifecheck/util/helpers.py", ""),
                ("lifecheck/README", "x"),
            ],
        );
        let work = dir.path().join("work");
        let outcome =
            extract_and_normalize(&archive, &work, "lifecheck", Path::new("main.py")).unwrap();
        assert_eq!(outcome.root, work.join("lifecheck"));
        assert_eq!(outcome.file_count, 3);
    }

    #[test]
    fn versioned_top_level_directory_is_renamed() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        write_zip(
            &archive,
            &[
                ("payload_v2/", ""),
                ("payload_v2/main.py", "print()"),
                ("payload_v2/data.csv", "1,2"),
            ],
        );
        let work = dir.path().join("work");
        let outcome =
            extract_and_normalize(&archive, &work, "lifecheck", Path::new("main.py")).unwrap();
        assert_eq!(outcome.root, work.join("lifecheck"));
        assert!(work.join("lifecheck/main.py").is_file());
        assert!(!work.join("payload_v2").exists());
        assert_eq!(outcome.file_count, 2);
    }

    #[test]
    fn first_matching_directory_by_name_wins() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        write_zip(
            &archive,
            &[
                ("zeta/main.py", "z"),
                ("alpha/main.py", "a"),
                ("docs/index.md", ""),
            ],
        );
        let work = dir.path().join("work");
        extract_and_normalize(&archive, &work, "lifecheck", Path::new("main.py")).unwrap();
        assert_eq!(fs::read_to_string(work.join("lifecheck/main.py")).unwrap(), "a");
        assert!(work.join("zeta/main.py").is_file());
    }

    #[test]
    fn empty_canonical_directory_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        write_zip(&archive, &[("lifecheck/", ""), ("build-7/main.py", "ok")]);
        let work = dir.path().join("work");
        let outcome =
            extract_and_normalize(&archive, &work, "lifecheck", Path::new("main.py")).unwrap();
        assert!(outcome.root.join("main.py").is_file());
    }

    #[test]
    fn missing_entry_point_is_layout_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        write_zip(&archive, &[("stuff/readme.txt", "hi"), ("app.py", "")]);
        let err = extract_and_normalize(
            &archive,
            &dir.path().join("work"),
            "lifecheck",
            Path::new("main.py"),
        )
        .unwrap_err();
        assert!(matches!(err, LodgeError::LayoutMismatch(_)));
    }

    #[test]
    fn corrupt_archive_is_bad_archive() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        fs::write(&archive, b"PK\x03\x04 this is not really a zip").unwrap();
        let err = extract_zip(&archive, &dir.path().join("work")).unwrap_err();
        assert!(matches!(err, LodgeError::BadArchive(..)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn parent_components_are_rejected() {
        assert_eq!(safe_join(Path::new("/w"), Path::new("../etc/passwd")), None);
        assert_eq!(safe_join(Path::new("/w"), Path::new("/etc/passwd")), None);
        assert_eq!(
            safe_join(Path::new("/w"), Path::new("./a/b")),
            Some(PathBuf::from("/w/a/b"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn unix_modes_are_restored() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("a.zip");
        {
            let mut zip = ZipWriter::new(File::create(&archive).unwrap());
            zip.start_file(
                "app/run.sh",
                SimpleFileOptions::default().unix_permissions(0o755),
            )
            .unwrap();
            zip.write_all(b"#!/bin/sh\n").unwrap();
            zip.finish().unwrap();
        }
        let work = dir.path().join("work");
        extract_zip(&archive, &work).unwrap();
        let mode = fs::metadata(work.join("app/run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
