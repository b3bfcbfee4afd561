//! Shared helpers for registry client tests.

use std::path::Path;
use std::sync::Arc;

use wiremock::MockServer;
use xt_cli::auth::CredentialIssuer;
use xt_cli::client::ApiClient;
use xt_cli::config::{Config, Credentials};
use xt_reconcile::ConfigHash;
use xt_session::{DraftUpdate, SharedTokens};

pub fn config_for(server: &MockServer) -> Config {
    Config {
        api_url: server.uri(),
        ..Config::default()
    }
}

/// Client and token supplier backed by `credentials`, saving refreshes to `dir`.
pub fn authenticated_client(
    server: &MockServer,
    dir: &Path,
    credentials: Option<Credentials>,
) -> (ApiClient, Arc<SharedTokens<CredentialIssuer>>) {
    let config = config_for(server);
    let issuer = CredentialIssuer::new(
        ApiClient::new(&config).unwrap(),
        dir.to_path_buf(),
        credentials,
    );
    let tokens = Arc::new(SharedTokens::new(issuer));
    let client = ApiClient::new(&config).unwrap().with_tokens(tokens.clone());
    (client, tokens)
}

pub fn credentials(token: &str, refresh_token: Option<&str>) -> Credentials {
    let mut creds = Credentials::new(token.to_string());
    creds.refresh_token = refresh_token.map(str::to_string);
    creds
}

pub fn draft() -> DraftUpdate {
    let configuration = serde_json::json!({"type": "ui_extension", "targets": ["checkout.block"]});
    DraftUpdate {
        app_id: "app-1".to_string(),
        registration_id: "gid-1".to_string(),
        artifact_ref: "sha256:abc".to_string(),
        config_hash: ConfigHash::from_json(&configuration),
        configuration,
    }
}
