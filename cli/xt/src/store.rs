//! Identifier maps saved inside the project.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use xt_reconcile::IdentifierMap;
use xt_session::{IdentifierStore, StoreError};

/// Directory holding per-project CLI state.
pub const STATE_DIR: &str = ".xt";

/// Stores one JSON file per app key under `<project>/.xt/`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(project_root: &Path) -> Self {
        Self {
            dir: project_root.join(STATE_DIR),
        }
    }

    fn path(&self, app_key: &str) -> PathBuf {
        self.dir.join(format!("identifiers.{}.json", app_key))
    }
}

#[async_trait]
impl IdentifierStore for FileStore {
    async fn load(&self, app_key: &str) -> Result<IdentifierMap, StoreError> {
        let path = self.path(app_key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(IdentifierMap::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, app_key: &str, map: &IdentifierMap) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path(app_key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(map)?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), extensions = map.len(), "Saved identifiers");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert_eq!(store.load("default").await.unwrap(), IdentifierMap::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let mut map = IdentifierMap::for_app("app-1");
        map.insert("banner", "uuid-1");
        store.save("default", &map).await.unwrap();

        assert_eq!(store.load("default").await.unwrap(), map);
        assert!(dir.path().join(".xt/identifiers.default.json").is_file());
        assert!(!dir.path().join(".xt/identifiers.default.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(STATE_DIR)).unwrap();
        std::fs::write(dir.path().join(".xt/identifiers.default.json"), "{nope").unwrap();

        let store = FileStore::new(dir.path());
        assert!(matches!(store.load("default").await, Err(StoreError::Format(_))));
    }
}
