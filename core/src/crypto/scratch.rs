// Scratch files — temporary staging area for side-channel transfers
//
// Anything created under the scratch root is disposable and deleted once
// a transfer succeeds. Files outside it belong to someone else and are
// never touched.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::file::FileCodecError;

#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    /// Use `root` as scratch area, creating it if missing
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, FileCodecError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| FileCodecError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A fresh, unused path inside the scratch area
    pub fn new_path(&self) -> PathBuf {
        self.root.join(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Whether `path` lives in the scratch area
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Serialize `value` as JSON into a fresh scratch file
    pub async fn data_to_file<T: Serialize>(&self, value: &T) -> Result<PathBuf, FileCodecError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| FileCodecError::Serialization(e.to_string()))?;
        let path = self.new_path();
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| FileCodecError::io(&path, e))?;
        Ok(path)
    }
}

/// Remove a file, logging instead of failing.
///
/// Returns whether the file was removed.
pub async fn delete_file(path: PathBuf) -> bool {
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            debug!("Deleted {}", path.display());
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to delete {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_new_paths_are_unique_and_inside() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::open(dir.path().join("tmp")).unwrap();

        let a = scratch.new_path();
        let b = scratch.new_path();
        assert_ne!(a, b);
        assert!(scratch.contains(&a));
        assert!(!scratch.contains(dir.path()));
    }

    #[tokio::test]
    async fn test_data_to_file_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = ScratchDir::open(dir.path().join("tmp")).unwrap();

        let mut counts = BTreeMap::new();
        counts.insert("spam.*link", 4u64);
        let path = scratch.data_to_file(&counts).await.unwrap();

        let stored: BTreeMap<String, u64> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored.get("spam.*link"), Some(&4));

        assert!(delete_file(path.clone()).await);
        assert!(!path.exists());
        assert!(!delete_file(path).await);
    }
}
