//! Build executor interface.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::BuildError;
use crate::extension::Extension;

/// How a build is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Unminified, fast build for drafts.
    Development,
    /// Full production build.
    Production,
}

/// Output of a successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildArtifact {
    /// Reference passed to the registry (content digest or upload key).
    pub reference: String,

    /// Artifact size in bytes.
    pub size: u64,
}

/// Notifications from a watch-mode build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Sources changed and a rebuild started.
    Building,
    /// The rebuild finished.
    Rebuilt(BuildArtifact),
    /// The rebuild failed. The watch continues.
    BuildFailed(String),
}

/// Builds extensions.
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    /// Build an extension once.
    async fn build(&self, extension: &Extension, mode: BuildMode)
        -> Result<BuildArtifact, BuildError>;

    /// Watch an extension's sources and rebuild on every change.
    ///
    /// Events are never held back by a slow consumer. The watch stops when
    /// the returned receiver is dropped.
    async fn watch(
        &self,
        extension: &Extension,
    ) -> Result<mpsc::UnboundedReceiver<WatchEvent>, BuildError>;
}
