//! Link command (pair local extensions with registrations).

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use xt_reconcile::ResolveMode;
use xt_session::{Extension, LinkedApp, Linker, Registry, SessionCache, TokenSupplier};

use crate::output::{print_info, print_output};
use crate::project::Project;
use crate::prompt::TerminalPrompt;
use crate::store::FileStore;

use super::{CommandContext, APP_KEY};

/// Link command - pair local extensions with registrations.
#[derive(Debug, Args)]
pub struct LinkCommand {
    /// Accept every suggested match and register new extensions without asking.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct LinkRow {
    #[tabled(rename = "HANDLE")]
    handle: String,
    #[tabled(rename = "TYPE")]
    resource_type: String,
    #[tabled(rename = "UUID")]
    uuid: String,
    #[tabled(rename = "STATUS")]
    status: &'static str,
}

impl LinkCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let project = ctx.project()?;
        let app_id = ctx.require_app(&project)?;
        let extensions = project.load_extensions()?;

        let tokens = ctx.tokens()?;
        let registry: Arc<dyn Registry> = Arc::new(ctx.client(tokens.clone())?);
        let linked = link(
            &project,
            &app_id,
            &extensions,
            self.force,
            registry,
            tokens,
            Arc::new(SessionCache::new()),
        )
        .await?;

        let rows: Vec<LinkRow> = extensions
            .iter()
            .map(|ext| {
                let registration = linked.registration_for(&ext.handle);
                let created = registration.is_some_and(|r| linked.created.contains(r));
                LinkRow {
                    handle: ext.handle.clone(),
                    resource_type: ext.resource_type().to_string(),
                    uuid: registration.map(|r| r.uuid.clone()).unwrap_or_default(),
                    status: if created { "created" } else { "linked" },
                }
            })
            .collect();
        print_output(&rows, ctx.format);

        for remote in &linked.remote_only {
            print_info(&format!(
                "Registration \"{}\" ({}) has no local extension.",
                remote.title, remote.uuid
            ));
        }

        Ok(())
    }
}

/// Link every extension of the project, prompting unless `force` is set.
pub(super) async fn link(
    project: &Project,
    app_id: &str,
    extensions: &[Extension],
    force: bool,
    registry: Arc<dyn Registry>,
    tokens: Arc<dyn TokenSupplier>,
    cache: Arc<SessionCache>,
) -> Result<LinkedApp> {
    let store = Arc::new(FileStore::new(&project.root));
    let linker = Linker::new(registry, tokens, store, cache);
    let mode = if force {
        ResolveMode::Force
    } else {
        ResolveMode::Interactive
    };

    linker
        .ensure_identifiers(app_id, APP_KEY, extensions, mode, &TerminalPrompt)
        .await
        .context("Failed to link extensions")
}
