//! Error handling and display for the CLI.

use colored::Colorize;
use thiserror::Error;
use xt_reconcile::ReconcileError;
use xt_session::{LinkError, RegistryError, SupervisorError, TokenError};

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Not authenticated. Run `xt auth login` to authenticate.")]
    NotAuthenticated,

    #[error("API error: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        request_id: Option<String>,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Create an API error from response details.
    pub fn api(
        status: u16,
        code: impl Into<String>,
        message: impl Into<String>,
        request_id: Option<String>,
    ) -> Self {
        Self::Api {
            status,
            code: code.into(),
            message: message.into(),
            request_id,
        }
    }
}

impl From<CliError> for RegistryError {
    fn from(err: CliError) -> Self {
        match err {
            CliError::NotAuthenticated => RegistryError::Unauthorized,
            CliError::Api {
                status, message, ..
            } if status == 422 => RegistryError::Rejected {
                messages: vec![message],
            },
            CliError::Api {
                status, message, ..
            } => RegistryError::Api { status, message },
            CliError::NotFound(message) => RegistryError::Api {
                status: 404,
                message,
            },
            CliError::Network(e) => RegistryError::Transport(e.to_string()),
            CliError::Other(e) => RegistryError::Transport(format!("{e:#}")),
        }
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    if let Some(hint) = hint(err) {
        eprintln!("\n{}", hint.yellow());
    }

    if let Some(CliError::Api {
        request_id: Some(request_id),
        ..
    }) = err.downcast_ref::<CliError>()
    {
        eprintln!("\nRequest ID: {}", request_id);
    }
}

/// Hint for the first error in the chain that has one.
fn hint(err: &anyhow::Error) -> Option<String> {
    err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<CliError>() {
            return cli_hint(e);
        }
        if let Some(e) = cause.downcast_ref::<ReconcileError>() {
            return Some(reconcile_hint(e));
        }
        if let Some(e) = cause.downcast_ref::<RegistryError>() {
            return registry_hint(e);
        }
        if let Some(TokenError::Missing) = cause.downcast_ref::<TokenError>() {
            return Some("Hint: Run `xt auth login` to authenticate.".to_string());
        }
        if let Some(e) = cause.downcast_ref::<LinkError>() {
            return match e {
                LinkError::Reconcile(e) => Some(reconcile_hint(e)),
                LinkError::Registry(e) => registry_hint(e),
                _ => None,
            };
        }
        if let Some(e) = cause.downcast_ref::<SupervisorError>() {
            return Some(format!(
                "Hint: `{}` stopped the dev session. Its output is above.",
                e.label()
            ));
        }
        None
    })
}

fn cli_hint(err: &CliError) -> Option<String> {
    match err {
        CliError::NotAuthenticated => Some("Hint: Run `xt auth login` to authenticate.".to_string()),
        CliError::Api { status: 401, .. } => {
            Some("Hint: Your session may have expired. Run `xt auth login`.".to_string())
        }
        CliError::Api { status: 403, .. } => {
            Some("Hint: You may not have permission for this operation.".to_string())
        }
        CliError::Network(_) => {
            Some("Hint: Check your network connection and API endpoint.".to_string())
        }
        CliError::NotFound(_) => {
            Some("Hint: Check the app ID passed with --app or set in xt.toml.".to_string())
        }
        _ => None,
    }
}

fn registry_hint(err: &RegistryError) -> Option<String> {
    match err {
        RegistryError::Unauthorized => {
            Some("Hint: Your session may have expired. Run `xt auth login`.".to_string())
        }
        RegistryError::Transport(_) => {
            Some("Hint: Check your network connection and API endpoint.".to_string())
        }
        _ => None,
    }
}

fn reconcile_hint(err: &ReconcileError) -> String {
    match err {
        ReconcileError::PendingRemote => {
            "Hint: Some registrations could not be matched automatically. Run `xt link` without --force to pick them."
                .to_string()
        }
        ReconcileError::InvalidEnvironment { .. } => {
            "Hint: The saved identifiers belong to another app. Pass the right --app or delete .xt/ to relink."
                .to_string()
        }
        ReconcileError::UserCancelled => "Hint: Nothing was saved.".to_string(),
        ReconcileError::InvalidManualMatch(_) => {
            "Hint: Each registration can be picked for at most one extension.".to_string()
        }
    }
}
