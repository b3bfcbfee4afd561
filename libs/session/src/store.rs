//! Persisted identifier store interface.

use async_trait::async_trait;
use xt_reconcile::IdentifierMap;

use crate::error::StoreError;

/// Storage for the identifier map of a project.
///
/// `app_key` names the project configuration, not the remote app. The map
/// itself records the app it was produced for.
#[async_trait]
pub trait IdentifierStore: Send + Sync {
    /// Load the saved map. A missing map loads as empty.
    async fn load(&self, app_key: &str) -> Result<IdentifierMap, StoreError>;

    /// Replace the saved map.
    async fn save(&self, app_key: &str, map: &IdentifierMap) -> Result<(), StoreError>;
}
