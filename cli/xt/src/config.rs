//! Configuration and credential storage.
//!
//! Handles:
//! - API endpoint configuration and the saved app context (`config.json`)
//! - Authentication token storage (`credentials.json`)
//! - Project configuration (`xt.toml`)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Configuration file name.
const CONFIG_FILE: &str = "config.json";

/// Credentials file name.
const CREDENTIALS_FILE: &str = "credentials.json";

/// Project configuration file name.
pub const PROJECT_FILE: &str = "xt.toml";

/// Get the config directory path.
pub fn config_dir() -> Result<PathBuf> {
    ProjectDirs::from("dev", "xt", "xt")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
}

/// Write a file readable only by the current user.
fn write_private(path: &Path, contents: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .with_context(|| format!("Failed to open {:?}", path))?;
        file.write_all(contents.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        fs::write(path, contents).with_context(|| format!("Failed to write {:?}", path))?;
    }

    Ok(())
}

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// API endpoint URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Current context.
    #[serde(default)]
    pub context: CliContext,
}

fn default_api_url() -> String {
    std::env::var("XT_API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            context: CliContext::default(),
        }
    }
}

impl Config {
    /// Load config from the default directory, or return default.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_dir()?)
    }

    /// Load config from `dir`, or return default.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))
    }

    /// Get the API URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Save config to `dir`.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let contents = serde_json::to_string_pretty(self)?;
        write_private(&dir.join(CONFIG_FILE), &contents)
    }
}

/// Saved CLI context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliContext {
    /// Default app ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
}

/// Stored credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    /// Access token.
    pub token: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Token expiration time (if known).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,

    /// User email.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Credentials {
    /// Create new credentials.
    pub fn new(token: String) -> Self {
        Self {
            token,
            refresh_token: None,
            expires_at: None,
            email: None,
        }
    }

    /// Load credentials from the default directory.
    pub fn load() -> Result<Option<Self>> {
        Self::load_from(&config_dir()?)
    }

    /// Load credentials from `dir`.
    pub fn load_from(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(CREDENTIALS_FILE);

        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read credentials from {:?}", path))?;

        let creds: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse credentials from {:?}", path))?;

        Ok(Some(creds))
    }

    /// Save credentials to `dir` with restrictive permissions.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let contents = serde_json::to_string_pretty(self)?;
        write_private(&dir.join(CREDENTIALS_FILE), &contents)
    }

    /// Delete credentials from `dir`.
    pub fn delete_from(dir: &Path) -> Result<()> {
        let path = dir.join(CREDENTIALS_FILE);

        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to delete credentials at {:?}", path))?;
        }

        Ok(())
    }

    /// Check if the token is expired.
    pub fn is_expired(&self) -> bool {
        if let Some(expires_at) = self.expires_at {
            chrono::Utc::now() >= expires_at
        } else {
            false
        }
    }
}

/// Project configuration (`xt.toml`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Remote app the project belongs to.
    #[serde(default)]
    pub app_id: Option<String>,

    /// Directory holding one sub-directory per extension.
    #[serde(default = "default_extensions_dir")]
    pub extensions_dir: PathBuf,

    #[serde(default)]
    pub dev: DevSettings,
}

fn default_extensions_dir() -> PathBuf {
    PathBuf::from("extensions")
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            extensions_dir: default_extensions_dir(),
            dev: DevSettings::default(),
        }
    }
}

impl ProjectConfig {
    /// Load `xt.toml` from a project root. A missing file loads as default.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join(PROJECT_FILE);

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read project config from {:?}", path))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse project config from {:?}", path))
    }
}

/// `[dev]` section of `xt.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevSettings {
    pub poll_interval_ms: u64,
    pub shutdown_grace_secs: u64,
    pub output_buffer_lines: usize,
}

impl Default for DevSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            shutdown_grace_secs: 5,
            output_buffer_lines: 500,
        }
    }
}

impl DevSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(50))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(!config.api_url.is_empty());
    }

    #[test]
    fn test_credentials_new() {
        let creds = Credentials::new("test-token".to_string());
        assert_eq!(creds.token, "test-token");
        assert!(!creds.is_expired());
    }

    #[test]
    fn test_credentials_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Credentials::load_from(dir.path()).unwrap().is_none());

        let mut creds = Credentials::new("t1".to_string());
        creds.refresh_token = Some("r1".to_string());
        creds.save_to(dir.path()).unwrap();

        assert_eq!(Credentials::load_from(dir.path()).unwrap(), Some(creds));

        Credentials::delete_from(dir.path()).unwrap();
        assert!(Credentials::load_from(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_project_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PROJECT_FILE), "app_id = \"app-1\"\n[dev]\npoll_interval_ms = 200\n")
            .unwrap();

        let config = ProjectConfig::load(dir.path()).unwrap();
        assert_eq!(config.app_id.as_deref(), Some("app-1"));
        assert_eq!(config.extensions_dir, PathBuf::from("extensions"));
        assert_eq!(config.dev.poll_interval(), Duration::from_millis(200));
        assert_eq!(config.dev.shutdown_grace_secs, 5);
    }
}
