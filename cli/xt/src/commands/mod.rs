//! CLI commands.

mod auth;
mod dev;
mod diff;
mod link;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use xt_session::{SharedTokens, TokenSupplier};

use crate::auth::CredentialIssuer;
use crate::client::ApiClient;
use crate::config::{config_dir, Config, Credentials};
use crate::logging::LogFormat;
use crate::output::OutputFormat;
use crate::project::Project;

/// Identifier store key for the project's linked app.
pub const APP_KEY: &str = "default";

/// xt - develop extensions against a live app.
#[derive(Debug, Parser)]
#[command(name = "xt")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Log more detail to stderr.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Log line format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// Application ID.
    #[arg(long, global = true, env = "XT_APP")]
    app: Option<String>,

    /// Project root.
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Authenticate with the registry.
    Auth(auth::AuthCommand),

    /// Link local extensions to their registrations.
    Link(link::LinkCommand),

    /// Build, push drafts and watch for changes.
    Dev(dev::DevCommand),

    /// Compare two app snapshots.
    Diff(diff::DiffCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let config_dir = config_dir()?;
        let config = Config::load_from(&config_dir)?;
        let credentials = Credentials::load_from(&config_dir)?;

        let ctx = CommandContext {
            config,
            config_dir,
            credentials,
            format: self.format,
            app: self.app,
            project_root: self.project,
        };

        match self.command {
            Commands::Auth(cmd) => cmd.run(ctx).await,
            Commands::Link(cmd) => cmd.run(ctx).await,
            Commands::Dev(cmd) => cmd.run(ctx).await,
            Commands::Diff(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("xt {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config: Config,
    pub config_dir: PathBuf,
    pub credentials: Option<Credentials>,
    pub format: OutputFormat,
    pub app: Option<String>,
    pub project_root: PathBuf,
}

impl CommandContext {
    /// Get an unauthenticated API client.
    pub fn anonymous_client(&self) -> Result<ApiClient> {
        ApiClient::new(&self.config)
    }

    /// Token supplier backed by the stored credentials.
    pub fn tokens(&self) -> Result<Arc<SharedTokens<CredentialIssuer>>> {
        let issuer = CredentialIssuer::new(
            self.anonymous_client()?,
            self.config_dir.clone(),
            self.credentials.clone(),
        );
        Ok(Arc::new(SharedTokens::new(issuer)))
    }

    /// Get an API client authenticated with `tokens`.
    pub fn client(&self, tokens: Arc<dyn TokenSupplier>) -> Result<ApiClient> {
        Ok(self.anonymous_client()?.with_tokens(tokens))
    }

    /// Open the project.
    pub fn project(&self) -> Result<Project> {
        Project::open(&self.project_root)
    }

    /// Resolve the app: flag, then `xt.toml`, then saved context.
    pub fn require_app(&self, project: &Project) -> Result<String> {
        self.app
            .clone()
            .or_else(|| project.config.app_id.clone())
            .or_else(|| self.config.context.app.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("No application specified. Use --app or set app_id in xt.toml.")
            })
    }
}
