//! In-memory collaborators for tests and local development.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use xt_reconcile::{IdentifierMap, LocalSource, MatchPrompt, RemoteSource};

use crate::build::{BuildArtifact, BuildExecutor, BuildMode, WatchEvent};
use crate::error::{BuildError, RegistryError, StoreError, TokenError};
use crate::extension::Extension;
use crate::registry::{DraftReceipt, DraftUpdate, NewRegistration, Registry};
use crate::store::IdentifierStore;
use crate::token::TokenSupplier;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Registry
// =============================================================================

/// Registry with scripted failures and call counters.
#[derive(Default)]
pub struct MockRegistry {
    registrations: Mutex<Vec<RemoteSource>>,
    push_failures: Mutex<VecDeque<RegistryError>>,
    list_failures: Mutex<VecDeque<RegistryError>>,
    pushed: Mutex<Vec<DraftUpdate>>,
    push_delay: Option<Duration>,
    push_attempts: AtomicU32,
    list_calls: AtomicU32,
    created: AtomicU32,
}

impl MockRegistry {
    pub fn new(registrations: Vec<RemoteSource>) -> Self {
        Self {
            registrations: Mutex::new(registrations),
            ..Self::default()
        }
    }

    /// Delay every push, to keep one in flight.
    pub fn with_push_delay(mut self, delay: Duration) -> Self {
        self.push_delay = Some(delay);
        self
    }

    /// Make the next push attempt fail with `error`.
    pub fn fail_next_push(&self, error: RegistryError) {
        lock(&self.push_failures).push_back(error);
    }

    /// Make the next listing fail with `error`.
    pub fn fail_next_list(&self, error: RegistryError) {
        lock(&self.list_failures).push_back(error);
    }

    /// Number of push attempts, failed ones included.
    pub fn push_attempts(&self) -> u32 {
        self.push_attempts.load(Ordering::SeqCst)
    }

    /// Drafts that were accepted, in order.
    pub fn pushed(&self) -> Vec<DraftUpdate> {
        lock(&self.pushed).clone()
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn created_count(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Registry for MockRegistry {
    async fn list_registrations(&self, _app_id: &str) -> Result<Vec<RemoteSource>, RegistryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.list_failures).pop_front() {
            return Err(err);
        }
        Ok(lock(&self.registrations).clone())
    }

    async fn push_draft(&self, draft: &DraftUpdate) -> Result<DraftReceipt, RegistryError> {
        let attempt = self.push_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.push_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = lock(&self.push_failures).pop_front() {
            return Err(err);
        }
        lock(&self.pushed).push(draft.clone());
        Ok(DraftReceipt {
            version: Some(format!("v{attempt}")),
        })
    }

    async fn create_registration(
        &self,
        _app_id: &str,
        request: &NewRegistration,
    ) -> Result<RemoteSource, RegistryError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let remote = RemoteSource {
            id: format!("id-{}", request.handle),
            uuid: format!("uuid-{}", request.handle),
            resource_type: request.resource_type.clone(),
            title: request.title.clone(),
        };
        lock(&self.registrations).push(remote.clone());
        Ok(remote)
    }
}

// =============================================================================
// Tokens
// =============================================================================

/// Token supplier that counts refreshes.
#[derive(Default)]
pub struct MockTokens {
    refreshes: AtomicU32,
    fail_refresh: bool,
}

impl MockTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// A supplier whose refreshes always fail.
    pub fn failing() -> Self {
        Self {
            fail_refresh: true,
            ..Self::default()
        }
    }

    pub fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSupplier for MockTokens {
    async fn get_token(&self) -> Result<String, TokenError> {
        Ok(format!("token-{}", self.refreshes()))
    }

    async fn refresh_token(&self) -> Result<(), TokenError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh {
            return Err(TokenError::RefreshFailed("refresh token revoked".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Build executor whose watch events are sent by the test.
pub struct MockBuilder {
    builds: AtomicU32,
    fail_build: Option<String>,
    build_delay: Option<Duration>,
    senders: Mutex<HashMap<String, mpsc::UnboundedSender<WatchEvent>>>,
    watching: watch::Sender<Vec<String>>,
}

impl Default for MockBuilder {
    fn default() -> Self {
        let (watching, _) = watch::channel(Vec::new());
        Self {
            builds: AtomicU32::new(0),
            fail_build: None,
            build_delay: None,
            senders: Mutex::new(HashMap::new()),
            watching,
        }
    }
}

impl MockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder whose one-off builds fail.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_build: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    pub fn builds(&self) -> u32 {
        self.builds.load(Ordering::SeqCst)
    }

    /// Wait until `handle` is being watched.
    pub async fn wait_watching(&self, handle: &str) {
        let mut rx = self.watching.subscribe();
        let _ = rx.wait_for(|handles| handles.iter().any(|h| h == handle)).await;
    }

    /// Send a watch event for `handle`. Returns false if nobody is watching.
    pub async fn emit(&self, handle: &str, event: WatchEvent) -> bool {
        let sender = lock(&self.senders).get(handle).cloned();
        match sender {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Artifact the mock would produce for a build number.
    pub fn artifact(n: u32) -> BuildArtifact {
        BuildArtifact {
            reference: format!("artifact-{n}"),
            size: 1024,
        }
    }
}

#[async_trait]
impl BuildExecutor for MockBuilder {
    async fn build(&self, _extension: &Extension, _mode: BuildMode) -> Result<BuildArtifact, BuildError> {
        if let Some(delay) = self.build_delay {
            tokio::time::sleep(delay).await;
        }
        let n = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(message) = &self.fail_build {
            return Err(BuildError::Failed(message.clone()));
        }
        Ok(Self::artifact(n))
    }

    async fn watch(
        &self,
        extension: &Extension,
    ) -> Result<mpsc::UnboundedReceiver<WatchEvent>, BuildError> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.senders).insert(extension.handle.clone(), tx);
        self.watching
            .send_modify(|handles| handles.push(extension.handle.clone()));
        Ok(rx)
    }
}

// =============================================================================
// Store
// =============================================================================

/// Identifier store kept in memory.
#[derive(Default)]
pub struct MemoryStore {
    maps: Mutex<HashMap<String, IdentifierMap>>,
    saves: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `map` under `app_key`.
    pub fn with_map(app_key: &str, map: IdentifierMap) -> Self {
        let store = Self::default();
        lock(&store.maps).insert(app_key.to_string(), map);
        store
    }

    pub fn saves(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn get(&self, app_key: &str) -> Option<IdentifierMap> {
        lock(&self.maps).get(app_key).cloned()
    }
}

#[async_trait]
impl IdentifierStore for MemoryStore {
    async fn load(&self, app_key: &str) -> Result<IdentifierMap, StoreError> {
        Ok(self.get(app_key).unwrap_or_default())
    }

    async fn save(&self, app_key: &str, map: &IdentifierMap) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        lock(&self.maps).insert(app_key.to_string(), map.clone());
        Ok(())
    }
}

// =============================================================================
// Prompt
// =============================================================================

/// Prompt with fixed answers that records every question.
#[derive(Default)]
pub struct ScriptedPrompt {
    pub confirm: bool,
    pub create: bool,
    pub manual: Vec<(String, String)>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    /// Accept every confirmation and creation.
    pub fn accepting() -> Self {
        Self {
            confirm: true,
            create: true,
            ..Self::default()
        }
    }

    /// Decline every confirmation and creation.
    pub fn declining() -> Self {
        Self::default()
    }

    /// Questions asked so far.
    pub fn asked(&self) -> Vec<String> {
        lock(&self.asked).clone()
    }
}

impl MatchPrompt for ScriptedPrompt {
    fn confirm(&self, local: &LocalSource, remote: &RemoteSource) -> bool {
        lock(&self.asked).push(format!("confirm {} {}", local.local_identifier, remote.uuid));
        self.confirm
    }

    fn select_manual_match(&self, _locals: &[LocalSource], _remotes: &[RemoteSource]) -> IdentifierMap {
        lock(&self.asked).push("manual".to_string());
        let mut map = IdentifierMap::default();
        for (local, uuid) in &self.manual {
            map.insert(local.clone(), uuid.clone());
        }
        map
    }

    fn confirm_creation(&self, locals: &[LocalSource]) -> bool {
        lock(&self.asked).push(format!("create {}", locals.len()));
        self.create
    }
}
