//! Discovery of searchable photos under a folder.

use facefind_core::is_supported_image;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("folder does not exist: {0}")]
    FolderNotFound(PathBuf),
    #[error("could not resolve {path}: {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A photo found on disk, with the cheap part of its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryFile {
    pub path: PathBuf,
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch (0 if unavailable).
    pub modified_ns: i64,
}

/// Canonical absolute form of a gallery folder.
pub fn resolve_root(root: &Path) -> Result<PathBuf, GalleryError> {
    if !root.is_dir() {
        return Err(GalleryError::FolderNotFound(root.to_path_buf()));
    }
    root.canonicalize().map_err(|source| GalleryError::Resolve {
        path: root.to_path_buf(),
        source,
    })
}

/// Recursively list supported photos under `root`, sorted by path.
///
/// Unreadable entries and paths that are not valid UTF-8 are logged and skipped.
pub fn scan(root: &Path) -> Result<Vec<GalleryFile>, GalleryError> {
    let root = resolve_root(root)?;
    let mut files = Vec::new();

    for entry in WalkDir::new(&root).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_supported_image(entry.path()) {
            continue;
        }
        if entry.path().to_str().is_none() {
            tracing::warn!(path = %entry.path().display(), "skipping non UTF-8 path");
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "skipping file without metadata");
                continue;
            }
        };
        let modified_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);

        files.push(GalleryFile {
            path: entry.into_path(),
            size: metadata.len(),
            modified_ns,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    tracing::debug!(root = %root.display(), count = files.len(), "scanned gallery");
    Ok(files)
}

/// SHA-256 of the file contents, lowercase hex.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_scan_finds_supported_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("trip/day1")).unwrap();
        fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(dir.path().join("trip/B.PNG"), b"xy").unwrap();
        fs::write(dir.path().join("trip/day1/c.jpeg"), b"xyz").unwrap();

        let files = scan(dir.path()).unwrap();
        let root = dir.path().canonicalize().unwrap();
        let rel: Vec<_> = files
            .iter()
            .map(|f| f.path.strip_prefix(&root).unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(rel, vec!["a.jpg", "trip/B.PNG", "trip/day1/c.jpeg"]);
        assert_eq!(files[2].size, 3);
    }

    #[test]
    fn test_scan_missing_folder() {
        let err = scan(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, GalleryError::FolderNotFound(_)));
    }

    #[test]
    fn test_scan_rejects_file_as_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.jpg");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(scan(&file), Err(GalleryError::FolderNotFound(_))));
    }

    #[test]
    fn test_sha256_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.jpg");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
