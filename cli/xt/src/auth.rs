//! Access tokens backed by stored credentials.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};
use xt_session::{TokenError, TokenIssuer};

use crate::client::ApiClient;
use crate::config::Credentials;

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Issues tokens from `credentials.json`, refreshing through the API.
///
/// A refreshed token is written back so the next CLI run starts with it.
pub struct CredentialIssuer {
    client: ApiClient,
    dir: PathBuf,
    credentials: Mutex<Option<Credentials>>,
}

impl CredentialIssuer {
    /// `client` must be unauthenticated; `dir` is where credentials are saved.
    pub fn new(client: ApiClient, dir: PathBuf, credentials: Option<Credentials>) -> Self {
        Self {
            client,
            dir,
            credentials: Mutex::new(credentials),
        }
    }

    /// Credentials as currently known.
    pub async fn credentials(&self) -> Option<Credentials> {
        self.credentials.lock().await.clone()
    }
}

#[async_trait]
impl TokenIssuer for CredentialIssuer {
    async fn stored(&self) -> Result<String, TokenError> {
        let creds = self.credentials.lock().await.clone();
        match creds {
            None => Err(TokenError::Missing),
            Some(creds) if creds.is_expired() && creds.refresh_token.is_some() => {
                info!("Stored token expired, refreshing");
                self.issue().await
            }
            Some(creds) => Ok(creds.token),
        }
    }

    async fn issue(&self) -> Result<String, TokenError> {
        let mut guard = self.credentials.lock().await;
        let creds = guard.as_mut().ok_or(TokenError::Missing)?;
        let refresh_token = creds.refresh_token.clone().ok_or_else(|| {
            TokenError::RefreshFailed(
                "no refresh token stored, run `xt auth login`".to_string(),
            )
        })?;

        let response: RefreshResponse = self
            .client
            .post(
                "/v1/auth/refresh",
                &RefreshRequest {
                    refresh_token: &refresh_token,
                },
            )
            .await
            .map_err(|e| TokenError::RefreshFailed(e.to_string()))?;

        creds.token = response.access_token.clone();
        if let Some(refresh_token) = response.refresh_token {
            creds.refresh_token = Some(refresh_token);
        }
        creds.expires_at = response
            .expires_in
            .map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs));

        if let Err(e) = creds.save_to(&self.dir) {
            warn!(error = %e, "Failed to save refreshed credentials");
        }

        Ok(response.access_token)
    }
}
