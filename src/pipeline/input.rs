//! Input resolution: check a comic PDF path, or stage in-memory bytes on disk.
//!
//! ## Why stage bytes in a temp file?
//!
//! pdfium opens documents by path. Uploads arrive as byte buffers, so they are
//! written into a `TempDir` that lives as long as the [`ResolvedInput`]; the
//! file is removed when it is dropped, even on an error path. Both routes
//! check the `%PDF` magic bytes first so callers get a meaningful error
//! rather than a pdfium failure.

use crate::error::ExtractionError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A PDF that pdfium can open by path.
#[derive(Debug)]
pub enum ResolvedInput {
    /// A file the caller already had on disk.
    Local(PathBuf),
    /// Bytes written to a temp directory, kept alive with the path.
    Staged { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Staged { path, .. } => path,
        }
    }
}

/// Check that `path` exists, is readable, and starts with `%PDF`.
pub fn resolve_local(path: &Path) -> Result<ResolvedInput, ExtractionError> {
    let path = path.to_path_buf();

    if !path.exists() {
        return Err(ExtractionError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            // Files shorter than four bytes are left for pdfium to reject.
            if f.read_exact(&mut magic).is_ok() && &magic != PDF_MAGIC {
                return Err(ExtractionError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ExtractionError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(ExtractionError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Write `bytes` to a temp file so they can be rasterised.
pub async fn stage_bytes(bytes: &[u8]) -> Result<ResolvedInput, ExtractionError> {
    if bytes.len() >= 4 && &bytes[..4] != PDF_MAGIC {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(ExtractionError::NotAPdf {
            path: PathBuf::from("<upload>"),
            magic,
        });
    }

    let temp_dir = TempDir::new().map_err(|e| ExtractionError::Internal(e.to_string()))?;
    let path = temp_dir.path().join("upload.pdf");
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| ExtractionError::Internal(format!("Failed to write temp file: {}", e)))?;

    debug!("Staged {} bytes at {}", bytes.len(), path.display());
    Ok(ResolvedInput::Staged {
        path,
        _temp_dir: temp_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_not_found() {
        let err = resolve_local(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(matches!(err, ExtractionError::FileNotFound { .. }));
    }

    #[test]
    fn wrong_magic_is_not_a_pdf() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"PK\x03\x04zipdata").unwrap();

        let err = resolve_local(file.path()).unwrap_err();
        match err {
            ExtractionError::NotAPdf { magic, .. } => assert_eq!(&magic, b"PK\x03\x04"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn pdf_magic_accepted() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"%PDF-1.7\n%%EOF\n").unwrap();

        let resolved = resolve_local(file.path()).unwrap();
        assert_eq!(resolved.path(), file.path());
    }

    #[tokio::test]
    async fn staged_bytes_removed_on_drop() {
        let resolved = stage_bytes(b"%PDF-1.4\n%%EOF\n").await.unwrap();
        let path = resolved.path().to_path_buf();
        assert!(path.exists());
        drop(resolved);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn staged_bytes_checked_for_magic() {
        let err = stage_bytes(b"<html>").await.unwrap_err();
        assert!(matches!(err, ExtractionError::NotAPdf { .. }));
    }
}
