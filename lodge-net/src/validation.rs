// lodge-net/src/validation.rs
use std::fs::File;
use std::io::Read;
use std::path::Path;

use lodge_common::error::{LodgeError, Result};
use lodge_common::model::ValidationVerdict;
use url::Url;

/// Local file header signature every ZIP archive starts with.
pub const ZIP_MAGIC: [u8; 4] = *b"PK\x03\x04";
/// Upper bound on the diagnostic preview carried by `UnexpectedContent`.
pub const PREVIEW_LEN: usize = 200;

/// Classifies a downloaded file from its size and leading bytes.
///
/// Fails closed: a missing, unreadable or zero-byte file is `EmptyPayload`.
/// Anything whose first four bytes are not the ZIP signature is
/// `UnexpectedContent` with a lossily decoded preview (typically the HTML of
/// an error or interstitial page). Never modifies the file.
pub fn validate(path: &Path) -> ValidationVerdict {
    let size = match path.metadata() {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => {
            tracing::debug!("Payload {} is missing", path.display());
            return ValidationVerdict::EmptyPayload;
        }
    };
    if size == 0 {
        tracing::debug!("Payload {} is empty", path.display());
        return ValidationVerdict::EmptyPayload;
    }

    let mut prefix = Vec::with_capacity(PREVIEW_LEN);
    let read = File::open(path).and_then(|file| file.take(PREVIEW_LEN as u64).read_to_end(&mut prefix));
    if let Err(e) = read {
        tracing::debug!("Could not read payload {}: {}", path.display(), e);
        return ValidationVerdict::EmptyPayload;
    }

    if prefix.starts_with(&ZIP_MAGIC) {
        tracing::debug!("Payload {} ({} bytes) is a ZIP archive", path.display(), size);
        ValidationVerdict::ValidArchive
    } else {
        let preview = String::from_utf8_lossy(&prefix).into_owned();
        tracing::debug!(
            "Payload {} ({} bytes) is not a ZIP archive: {:?}",
            path.display(),
            size,
            preview
        );
        ValidationVerdict::UnexpectedContent { preview }
    }
}

/// Validates a URL, ensuring it uses the HTTP or HTTPS scheme.
pub fn validate_url(url_str: &str) -> Result<Url> {
    let url = Url::parse(url_str)
        .map_err(|e| LodgeError::ValidationError(format!("Failed to parse URL '{url_str}': {e}")))?;
    match url.scheme() {
        "https" | "http" => Ok(url),
        other => Err(LodgeError::ValidationError(format!(
            "Invalid URL scheme for '{url_str}': Must be http(s), but got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn zip_signature_is_a_valid_archive() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = ZIP_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 64]);
        assert_eq!(
            validate(&write(&dir, "a.zip", &bytes)),
            ValidationVerdict::ValidArchive
        );
        // Signature alone is enough; structure is the extractor's problem.
        assert_eq!(
            validate(&write(&dir, "b.zip", &ZIP_MAGIC)),
            ValidationVerdict::ValidArchive
        );
    }

    #[test]
    fn empty_and_missing_files_fail_closed() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            validate(&write(&dir, "empty.zip", b"")),
            ValidationVerdict::EmptyPayload
        );
        assert_eq!(
            validate(&dir.path().join("nope.zip")),
            ValidationVerdict::EmptyPayload
        );
        assert_eq!(validate(dir.path()), ValidationVerdict::EmptyPayload);
    }

    #[test]
    fn html_page_is_unexpected_content_with_bounded_preview() {
        let dir = tempfile::tempdir().unwrap();
        let page = format!(
            "<!DOCTYPE html><html><title>Virus scan warning</title>{}</html>",
            "x".repeat(1000)
        );
        match validate(&write(&dir, "page.zip", page.as_bytes())) {
            ValidationVerdict::UnexpectedContent { preview } => {
                assert!(preview.starts_with("<!DOCTYPE html>"));
                assert_eq!(preview.len(), PREVIEW_LEN);
            }
            other => panic!("expected unexpected content, got {other:?}"),
        }
    }

    #[test]
    fn preview_survives_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = [0xff, 0xfe, b'o', b'k', 0xc3];
        match validate(&write(&dir, "junk.bin", &bytes)) {
            ValidationVerdict::UnexpectedContent { preview } => {
                assert!(preview.contains("ok"));
                assert!(preview.contains('\u{FFFD}'));
            }
            other => panic!("expected unexpected content, got {other:?}"),
        }
    }

    #[test]
    fn short_prefix_of_signature_is_not_valid() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            validate(&write(&dir, "pk.zip", b"PK")),
            ValidationVerdict::UnexpectedContent { .. }
        ));
    }

    #[test]
    fn url_scheme_must_be_http() {
        assert!(validate_url("https://drive.google.com/uc?id=1").is_ok());
        assert!(validate_url("http://127.0.0.1:8080/file").is_ok());
        assert!(matches!(
            validate_url("ftp://example.com/file.zip"),
            Err(LodgeError::ValidationError(_))
        ));
        assert!(validate_url("not a url").is_err());
    }
}
