//! Loading an app project from disk.
//!
//! A project is a directory with an optional `xt.toml` and one sub-directory
//! per extension under `extensions_dir`, each holding an `extension.toml`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use xt_reconcile::AppSnapshot;
use xt_session::{AppLoader, Extension, ExtensionKind};

use crate::config::ProjectConfig;

/// Extension manifest file name.
pub const MANIFEST_FILE: &str = "extension.toml";

/// Fields every manifest may carry, whatever its type.
#[derive(Debug, Deserialize)]
struct ManifestHeader {
    #[serde(default)]
    handle: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    uid: Option<String>,
}

/// An app project.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: ProjectConfig,
}

impl Project {
    /// Open the project rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let config = ProjectConfig::load(&root)?;
        Ok(Self { root, config })
    }

    pub fn extensions_dir(&self) -> PathBuf {
        self.root.join(&self.config.extensions_dir)
    }

    /// Load every extension, ordered by directory name.
    ///
    /// Directories without a manifest are skipped. Two extensions with the
    /// same handle are an error.
    pub fn load_extensions(&self) -> Result<Vec<Extension>> {
        let dir = self.extensions_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut dirs: Vec<PathBuf> = fs::read_dir(&dir)
            .with_context(|| format!("Failed to read {:?}", dir))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.join(MANIFEST_FILE).is_file())
            .collect();
        dirs.sort();

        let mut handles = HashSet::new();
        let mut extensions = Vec::with_capacity(dirs.len());
        for dir in dirs {
            let extension = load_extension(&dir)?;
            if !handles.insert(extension.handle.clone()) {
                bail!("Duplicate extension handle {:?} in {:?}", extension.handle, dir);
            }
            extensions.push(extension);
        }

        Ok(extensions)
    }

    /// Snapshot of every extension currently on disk.
    pub fn snapshot(&self) -> Result<AppSnapshot> {
        Ok(self.load_extensions()?.iter().map(Extension::to_snapshot).collect())
    }
}

/// Load one extension from its directory.
pub fn load_extension(dir: &Path) -> Result<Extension> {
    let path = dir.join(MANIFEST_FILE);
    let contents =
        fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
    let manifest: toml::Value =
        toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
    let configuration = serde_json::to_value(manifest)?;

    let header: ManifestHeader = serde_json::from_value(configuration.clone())
        .with_context(|| format!("Invalid manifest {:?}", path))?;
    let kind: ExtensionKind = serde_json::from_value(configuration.clone())
        .with_context(|| format!("Unknown or incomplete extension type in {:?}", path))?;

    let handle = match header.handle {
        Some(handle) => handle,
        None => dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .with_context(|| format!("Cannot derive a handle from {:?}", dir))?,
    };
    let uid = header.uid.unwrap_or_else(|| derive_uid(&handle));
    let name = header.name.unwrap_or_else(|| handle.clone());

    Ok(Extension {
        handle,
        uid,
        name,
        directory: dir.to_path_buf(),
        kind,
        configuration,
    })
}

/// Stable uid for an extension whose manifest does not set one.
fn derive_uid(handle: &str) -> String {
    let digest = Sha256::digest(handle.as_bytes());
    hex::encode(&digest[..16])
}

/// Reloads a project from disk for the dev session.
pub struct ProjectLoader {
    project: Project,
}

impl ProjectLoader {
    pub fn new(project: Project) -> Self {
        Self { project }
    }
}

#[async_trait]
impl AppLoader for ProjectLoader {
    async fn load(&self) -> Result<AppSnapshot> {
        let project = self.project.clone();
        tokio::task::spawn_blocking(move || project.snapshot()).await?
    }
}
