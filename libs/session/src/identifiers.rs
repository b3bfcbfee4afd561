//! Identifier reconciliation for a whole app.
//!
//! [`Linker::ensure_identifiers`] is the only writer of the identifier map:
//!
//! 1. Load the saved map
//! 2. List remote registrations, through the session cache
//! 3. Match and resolve, prompting unless forced
//! 4. Register every extension that has no remote counterpart
//! 5. Save the final map once
//!
//! Any failure before step 5 leaves the saved map untouched.

use std::sync::Arc;

use tracing::info;
use xt_reconcile::{
    match_sources, resolve, IdentifierMap, LocalSource, MatchPrompt, RemoteSource, ResolveMode,
};

use crate::cache::SessionCache;
use crate::error::LinkError;
use crate::extension::Extension;
use crate::registry::{NewRegistration, Registry};
use crate::retry::{with_recovery, DEFAULT_MAX_RETRIES};
use crate::store::IdentifierStore;
use crate::token::TokenSupplier;

/// An app whose extensions all have remote registrations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkedApp {
    pub identifiers: IdentifierMap,

    /// Every registration of the app, including the ones just created.
    pub registrations: Vec<RemoteSource>,

    /// Registrations created by this pass.
    pub created: Vec<RemoteSource>,

    /// Registrations with no local counterpart.
    pub remote_only: Vec<RemoteSource>,
}

impl LinkedApp {
    /// Registration linked to a local extension handle.
    pub fn registration_for(&self, handle: &str) -> Option<&RemoteSource> {
        let uuid = self.identifiers.get(handle)?;
        self.registrations.iter().find(|r| r.uuid == uuid)
    }
}

/// Reconciles local extensions with remote registrations.
pub struct Linker {
    registry: Arc<dyn Registry>,
    tokens: Arc<dyn TokenSupplier>,
    store: Arc<dyn IdentifierStore>,
    cache: Arc<SessionCache>,
}

impl Linker {
    pub fn new(
        registry: Arc<dyn Registry>,
        tokens: Arc<dyn TokenSupplier>,
        store: Arc<dyn IdentifierStore>,
        cache: Arc<SessionCache>,
    ) -> Self {
        Self {
            registry,
            tokens,
            store,
            cache,
        }
    }

    /// Make sure every extension is linked to a registration of `app_id`.
    pub async fn ensure_identifiers(
        &self,
        app_id: &str,
        app_key: &str,
        extensions: &[Extension],
        mode: ResolveMode,
        prompt: &(dyn MatchPrompt + Sync),
    ) -> Result<LinkedApp, LinkError> {
        let previous = self.store.load(app_key).await?;

        let mut registrations = with_recovery(
            || async { Ok::<_, LinkError>(self.cache.registrations(self.registry.as_ref(), app_id).await?) },
            || self.tokens.refresh_token(),
            DEFAULT_MAX_RETRIES,
        )
        .await?;

        let locals: Vec<LocalSource> = extensions.iter().map(Extension::to_local_source).collect();
        let matched = match_sources(app_id, &locals, &registrations, &previous)?;
        let resolution = resolve(matched, mode, prompt)?;

        let mut identifiers = resolution.identifiers;
        let mut created = Vec::new();
        for local in &resolution.to_create {
            let request = NewRegistration {
                handle: local.local_identifier.clone(),
                title: local.display_name.clone(),
                resource_type: local.resource_type.clone(),
            };
            let remote = with_recovery(
                || async {
                    Ok::<_, LinkError>(self.registry.create_registration(app_id, &request).await?)
                },
                || self.tokens.refresh_token(),
                DEFAULT_MAX_RETRIES,
            )
            .await?;

            info!(
                extension = %local.local_identifier,
                uuid = %remote.uuid,
                "Registered extension"
            );
            identifiers.insert(local.local_identifier.clone(), remote.uuid.clone());
            created.push(remote);
        }

        if !created.is_empty() {
            self.cache.invalidate(app_id).await;
            registrations.extend(created.iter().cloned());
        }

        self.store.save(app_key, &identifiers).await?;
        info!(app_id, linked = identifiers.len(), created = created.len(), "Identifiers saved");

        Ok(LinkedApp {
            identifiers,
            registrations,
            created,
            remote_only: resolution.remote_only,
        })
    }
}
