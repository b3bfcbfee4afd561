//! Per-session cache.
//!
//! Scoped to one command run. Owned by the caller and passed explicitly to
//! whatever needs it; dropping it discards everything.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::debug;
use xt_reconcile::RemoteSource;

use crate::error::RegistryError;
use crate::registry::Registry;

/// Caches remote registration lists by app.
#[derive(Debug, Default)]
pub struct SessionCache {
    registrations: Mutex<HashMap<String, Vec<RemoteSource>>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registrations of `app_id`, listed at most once per session.
    pub async fn registrations(
        &self,
        registry: &dyn Registry,
        app_id: &str,
    ) -> Result<Vec<RemoteSource>, RegistryError> {
        let mut cached = self.registrations.lock().await;
        if let Some(list) = cached.get(app_id) {
            debug!(app_id, count = list.len(), "Registrations served from session cache");
            return Ok(list.clone());
        }

        let list = registry.list_registrations(app_id).await?;
        cached.insert(app_id.to_string(), list.clone());
        Ok(list)
    }

    /// Forget what is cached for `app_id`.
    pub async fn invalidate(&self, app_id: &str) {
        self.registrations.lock().await.remove(app_id);
    }
}
