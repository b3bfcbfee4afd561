//! Dev command (live draft session).

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use futures_util::FutureExt;
use tokio::sync::watch;
use tracing::info;
use xt_reconcile::{AppSnapshot, ExtensionSnapshot};
use xt_session::{Collaborators, DevConfig, DevSession, Extension, Registry, SessionCache};

use crate::builder::CommandBuilder;
use crate::logs::FunctionLogStream;
use crate::output::{print_info, print_success, print_warning};
use crate::project::ProjectLoader;
use crate::render::PaneRenderer;

use super::link::link;
use super::CommandContext;

/// Dev command - build, push drafts and watch for changes.
#[derive(Debug, Args)]
pub struct DevCommand {
    /// Accept every suggested match and register new extensions without asking.
    #[arg(long)]
    force: bool,
}

fn is_function(extension: &ExtensionSnapshot) -> bool {
    extension.resource_type.as_str() == "function"
}

impl DevCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let project = ctx.project()?;
        let app_id = ctx.require_app(&project)?;
        let extensions = project.load_extensions()?;
        if extensions.is_empty() {
            print_info(&format!(
                "No extensions found in {}.",
                project.extensions_dir().display()
            ));
            return Ok(());
        }

        let tokens = ctx.tokens()?;
        let client = ctx.client(tokens.clone())?;
        let registry: Arc<dyn Registry> = Arc::new(client.clone());
        let cache = Arc::new(SessionCache::new());

        let linked = link(
            &project,
            &app_id,
            &extensions,
            self.force,
            registry.clone(),
            tokens.clone(),
            cache,
        )
        .await?;

        let settings = &project.config.dev;
        let mut session = DevSession::new(DevConfig {
            app_id: app_id.clone(),
            poll_interval: settings.poll_interval(),
            shutdown_grace: settings.shutdown_grace(),
            output_buffer_lines: settings.output_buffer_lines,
        });

        let collaborators = Collaborators {
            registry,
            tokens,
            builder: Arc::new(CommandBuilder::new().with_debounce(settings.poll_interval())),
        };
        let workers = session.add_draft_workers(&linked, &extensions, &collaborators);
        if workers == 0 {
            print_warning("No extension can be pushed as a draft.");
        }

        let (logs, start_logs) = FunctionLogStream::new(client, app_id.clone());
        session.spawn(Box::new(logs));
        if extensions.iter().any(Extension::is_function) {
            let _ = start_logs.send(());
        } else {
            session.on_first_change("function-watch", is_function, move || {
                async move {
                    start_logs
                        .send(())
                        .map_err(|_| anyhow::anyhow!("function log stream already stopped"))
                }
                .boxed()
            });
        }

        let initial: AppSnapshot = extensions.iter().map(Extension::to_snapshot).collect();
        session.watch_app(Arc::new(ProjectLoader::new(project.clone())), initial);

        let (shutdown_tx, shutdown) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, stopping dev session");
                let _ = shutdown_tx.send(true);
            }
        });

        let (render_stop_tx, render_stop) = watch::channel(false);
        let renderer = tokio::spawn(PaneRenderer::new(session.output().clone()).run(render_stop));

        print_info(&format!(
            "Dev session for {} started with {} draft worker(s). Press Ctrl+C to stop.",
            app_id, workers
        ));
        let result = session.run(shutdown).await;

        let _ = render_stop_tx.send(true);
        let _ = renderer.await;

        result.context("Dev session failed")?;
        print_success("Dev session stopped.");
        Ok(())
    }
}
