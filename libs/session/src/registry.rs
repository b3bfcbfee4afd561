//! Remote registry interface.

use async_trait::async_trait;
use serde::Serialize;
use xt_reconcile::{ConfigHash, RemoteSource, ResourceType};

use crate::error::RegistryError;

/// A draft update for one registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DraftUpdate {
    pub app_id: String,

    /// Registry-internal ID of the registration.
    pub registration_id: String,

    /// Build artifact reference.
    pub artifact_ref: String,

    pub configuration: serde_json::Value,

    /// Fingerprint of `configuration`.
    pub config_hash: ConfigHash,
}

/// Accepted draft.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DraftReceipt {
    /// Draft version assigned by the registry, if it reports one.
    pub version: Option<String>,
}

/// What became of a push. Transport and auth failures are errors instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted(DraftReceipt),
    /// The registry validated the draft and refused it.
    Rejected(Vec<String>),
}

/// Request to register a new extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewRegistration {
    pub handle: String,
    pub title: String,
    pub resource_type: ResourceType,
}

/// Remote registry of extension registrations.
#[async_trait]
pub trait Registry: Send + Sync {
    /// List every registration of an app.
    async fn list_registrations(&self, app_id: &str) -> Result<Vec<RemoteSource>, RegistryError>;

    /// Replace the draft of a registration.
    async fn push_draft(&self, draft: &DraftUpdate) -> Result<DraftReceipt, RegistryError>;

    /// Register a new extension.
    async fn create_registration(
        &self,
        app_id: &str,
        request: &NewRegistration,
    ) -> Result<RemoteSource, RegistryError>;
}
