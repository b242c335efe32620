use crate::error::StoreError;
use log::info;
use std::io;
use std::path::{Path, PathBuf};

const DATA_DIR_NAME: &str = "climate_store";

/// Environment variable consulted by [`StorageRoot::from_env`].
pub const DATA_DIR_ENV: &str = "CLIMATE_DATA_DIR";

/// The directory every partition of a store lives under.
///
/// Passed explicitly to each component; nothing in the crate reads a global
/// data directory at call time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageRoot(PathBuf);

impl StorageRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// `<data_local_dir>/climate_store`, e.g. `~/.local/share/climate_store` on Linux.
    pub fn default_location() -> Result<Self, StoreError> {
        dirs::data_local_dir()
            .map(|p| Self(p.join(DATA_DIR_NAME)))
            .ok_or(StoreError::StorageRootResolution)
    }

    /// Uses `CLIMATE_DATA_DIR` when set and non-empty, otherwise
    /// [`StorageRoot::default_location`].
    pub fn from_env() -> Result<Self, StoreError> {
        match std::env::var(DATA_DIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => Ok(Self::new(dir)),
            _ => Self::default_location(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    pub(crate) fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.0.join(relative)
    }
}

impl AsRef<Path> for StorageRoot {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

pub async fn ensure_storage_root_exists(root: &StorageRoot) -> Result<(), StoreError> {
    let path = root.path();
    match tokio::fs::metadata(path).await {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(StoreError::StorageRootNotADirectory(path.to_path_buf()));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            info!("Creating storage directory: {}", path.display());
            tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| StoreError::StorageRootCreation(path.to_path_buf(), e))
        }
        Err(e) => Err(StoreError::StorageRootCreation(path.to_path_buf(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_storage_root_creates_nested_dirs() -> Result<(), Box<dyn std::error::Error>>
    {
        let dir = tempfile::tempdir()?;
        let root = StorageRoot::new(dir.path().join("a").join("b"));
        ensure_storage_root_exists(&root).await?;
        assert!(root.path().is_dir());
        // Second call is a no-op
        ensure_storage_root_exists(&root).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_ensure_storage_root_rejects_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let file_path = dir.path().join("not_a_dir");
        std::fs::write(&file_path, b"x")?;
        let result = ensure_storage_root_exists(&StorageRoot::new(&file_path)).await;
        assert!(matches!(
            result,
            Err(StoreError::StorageRootNotADirectory(_))
        ));
        Ok(())
    }
}
