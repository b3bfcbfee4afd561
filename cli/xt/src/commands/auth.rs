//! Authentication commands.

use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use xt_session::SharedTokens;

use crate::auth::CredentialIssuer;
use crate::config::Credentials;
use crate::output::{print_info, print_single, print_success, OutputFormat};

use super::CommandContext;

/// Authentication commands.
#[derive(Debug, Args)]
pub struct AuthCommand {
    #[command(subcommand)]
    command: AuthSubcommand,
}

#[derive(Debug, Subcommand)]
enum AuthSubcommand {
    /// Log in with an API token.
    Login(LoginArgs),

    /// Log out and delete stored credentials.
    Logout,

    /// Show current authentication status.
    Status,

    /// Show who you are logged in as.
    Whoami,
}

#[derive(Debug, Args)]
struct LoginArgs {
    /// API token.
    #[arg(long, env = "XT_TOKEN")]
    token: Option<String>,

    /// Refresh token, used to renew the API token when it expires.
    #[arg(long, env = "XT_REFRESH_TOKEN")]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct WhoAmIResponse {
    user_id: String,
    #[serde(default)]
    email: Option<String>,
}

impl AuthCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            AuthSubcommand::Login(args) => login(ctx, args).await,
            AuthSubcommand::Logout => logout(ctx),
            AuthSubcommand::Status => status(ctx),
            AuthSubcommand::Whoami => whoami(ctx).await,
        }
    }
}

/// Log in with a token.
async fn login(ctx: CommandContext, args: LoginArgs) -> Result<()> {
    let Some(token) = args.token else {
        print_info("Use --token or set the XT_TOKEN environment variable.");
        return Ok(());
    };

    let mut creds = Credentials::new(token);
    creds.refresh_token = args.refresh_token;

    // Validate the token before saving it.
    let issuer = CredentialIssuer::new(
        ctx.anonymous_client()?,
        ctx.config_dir.clone(),
        Some(creds.clone()),
    );
    let client = ctx.client(Arc::new(SharedTokens::new(issuer)))?;
    let whoami: WhoAmIResponse = client.get("/v1/auth/whoami").await?;
    creds.email = whoami.email;

    creds.save_to(&ctx.config_dir)?;

    print_success("Logged in successfully.");
    Ok(())
}

/// Log out.
fn logout(ctx: CommandContext) -> Result<()> {
    Credentials::delete_from(&ctx.config_dir)?;
    print_success("Logged out successfully.");
    Ok(())
}

/// Show authentication status.
fn status(ctx: CommandContext) -> Result<()> {
    match ctx.credentials {
        Some(creds) => {
            println!("{} Authenticated", "Status:".green().bold());

            if let Some(email) = &creds.email {
                println!("  Email: {}", email);
            }

            if creds.is_expired() {
                if creds.refresh_token.is_some() {
                    println!("  Token has expired and will be refreshed on next use.");
                } else {
                    println!(
                        "  {} Token has expired. Run `xt auth login`.",
                        "Warning:".yellow()
                    );
                }
            } else if let Some(expires_at) = creds.expires_at {
                println!("  Expires: {}", expires_at);
            }
        }
        None => {
            println!("{} Not authenticated", "Status:".red().bold());
            println!("\nRun {} to log in.", "xt auth login".cyan());
        }
    }

    Ok(())
}

/// Show who you are logged in as.
async fn whoami(ctx: CommandContext) -> Result<()> {
    let client = ctx.client(ctx.tokens()?)?;
    let whoami: WhoAmIResponse = client.get("/v1/auth/whoami").await?;

    match ctx.format {
        OutputFormat::Json => print_single(&whoami),
        OutputFormat::Table => println!("{}", whoami.email.as_deref().unwrap_or(&whoami.user_id)),
    }

    Ok(())
}
