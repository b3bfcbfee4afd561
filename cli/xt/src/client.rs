//! HTTP client for the extension registry API.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;
use xt_reconcile::{RemoteSource, ResourceType};
use xt_session::{
    DraftReceipt, DraftUpdate, NewRegistration, Registry, RegistryError, TokenError,
    TokenSupplier,
};

use crate::config::Config;
use crate::error::CliError;

/// API client for the registry.
///
/// Requests carry a bearer token from the attached [`TokenSupplier`], read
/// fresh for every request so that a refresh is picked up by the next retry.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Option<Arc<dyn TokenSupplier>>,
}

impl ApiClient {
    /// Create an unauthenticated client.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.api_url().trim_end_matches('/').to_string(),
            tokens: None,
        })
    }

    /// Authenticate every request with tokens from `tokens`.
    pub fn with_tokens(mut self, tokens: Arc<dyn TokenSupplier>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Build a URL for an endpoint.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<reqwest::RequestBuilder, CliError> {
        let request = self.client.request(method, self.url(path));
        let Some(tokens) = &self.tokens else {
            return Ok(request);
        };

        match tokens.get_token().await {
            Ok(token) => Ok(request.bearer_auth(token)),
            Err(TokenError::Missing) => Err(CliError::NotAuthenticated),
            Err(e) => Err(CliError::Other(e.into())),
        }
    }

    /// Make a GET request.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CliError> {
        let response = self.request(reqwest::Method::GET, path).await?.send().await?;

        self.handle_response(response).await
    }

    /// Make a POST request.
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CliError> {
        let response = self
            .request(reqwest::Method::POST, path)
            .await?
            .json(body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Make a GET request to an NDJSON endpoint and return the raw response body.
    pub async fn get_stream(&self, path: &str) -> Result<reqwest::Response, CliError> {
        let response = self
            .request(reqwest::Method::GET, path)
            .await?
            .header(ACCEPT, "application/x-ndjson")
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response)
        } else {
            self.handle_error(response).await
        }
    }

    /// Handle a successful or error response.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CliError> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| CliError::Other(anyhow::anyhow!("Failed to parse response: {}", e)))
        } else {
            self.handle_error(response).await
        }
    }

    /// Handle an error response.
    async fn handle_error<T>(&self, response: reqwest::Response) -> Result<T, CliError> {
        let status = response.status().as_u16();

        let error_body: ApiErrorResponse =
            response.json().await.unwrap_or_else(|_| ApiErrorResponse {
                code: "unknown".to_string(),
                message: "Unknown error".to_string(),
                request_id: None,
            });

        if status == 401 {
            return Err(CliError::NotAuthenticated);
        }

        if status == 404 {
            return Err(CliError::NotFound(error_body.message));
        }

        Err(CliError::api(
            status,
            error_body.code,
            error_body.message,
            error_body.request_id,
        ))
    }
}

/// API error response structure.
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    code: String,
    message: String,
    #[serde(default)]
    request_id: Option<String>,
}

/// A registration as returned by the API.
#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    id: String,
    uuid: String,
    resource_type: String,
    title: String,
}

impl From<RegistrationResponse> for RemoteSource {
    fn from(value: RegistrationResponse) -> Self {
        Self {
            id: value.id,
            uuid: value.uuid,
            resource_type: ResourceType::new(value.resource_type),
            title: value.title,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct DraftResponse {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    user_errors: Vec<UserError>,
}

#[derive(Debug, Deserialize)]
struct UserError {
    message: String,
}

#[async_trait]
impl Registry for ApiClient {
    async fn list_registrations(&self, app_id: &str) -> Result<Vec<RemoteSource>, RegistryError> {
        let response: ListResponse<RegistrationResponse> =
            self.get(&format!("/v1/apps/{}/extensions", app_id)).await?;

        debug!(app_id, count = response.items.len(), "Listed registrations");
        Ok(response.items.into_iter().map(RemoteSource::from).collect())
    }

    async fn push_draft(&self, draft: &DraftUpdate) -> Result<DraftReceipt, RegistryError> {
        let path = format!(
            "/v1/apps/{}/extensions/{}/draft",
            draft.app_id, draft.registration_id
        );
        let response: DraftResponse = self.post(&path, draft).await?;

        if !response.user_errors.is_empty() {
            return Err(RegistryError::Rejected {
                messages: response.user_errors.into_iter().map(|e| e.message).collect(),
            });
        }

        Ok(DraftReceipt {
            version: response.version,
        })
    }

    async fn create_registration(
        &self,
        app_id: &str,
        request: &NewRegistration,
    ) -> Result<RemoteSource, RegistryError> {
        let response: RegistrationResponse = self
            .post(&format!("/v1/apps/{}/extensions", app_id), request)
            .await?;

        Ok(response.into())
    }
}
