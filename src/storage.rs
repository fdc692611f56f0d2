//! Object storage collaborator. The core never interprets stored bytes; it
//! only reads them back for the media proxy and deletes them best-effort
//! when a find is removed.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Invalid object path: {0}")]
    InvalidPath(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

pub trait ObjectStorage: Send + Sync {
    fn read(&self, path: &str) -> StorageResult<Vec<u8>>;
    fn delete(&self, path: &str) -> StorageResult<()>;
}

/// Filesystem-backed storage rooted at a directory.
pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Reject traversal outside the root.
    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let rel = Path::new(path);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

impl ObjectStorage for FsObjectStorage {
    fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        let full = self.resolve(path)?;
        match std::fs::read(&full) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn delete(&self, path: &str) -> StorageResult<()> {
        let full = self.resolve(path)?;
        match std::fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

/// Guess a content type from the object path extension.
pub fn content_type_for(path: &str) -> &'static str {
    match path.rsplit('.').next().unwrap_or_default() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("finds")).unwrap();
        std::fs::write(dir.path().join("finds/a.jpg"), b"bytes").unwrap();

        let storage = FsObjectStorage::new(dir.path());
        assert_eq!(storage.read("finds/a.jpg").unwrap(), b"bytes");

        storage.delete("finds/a.jpg").unwrap();
        assert!(matches!(
            storage.read("finds/a.jpg"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsObjectStorage::new(dir.path());
        assert!(matches!(
            storage.read("../etc/passwd"),
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_content_type_guess() {
        assert_eq!(content_type_for("a/b.webp"), "image/webp");
        assert_eq!(content_type_for("clip.mp4"), "video/mp4");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
