//! Diff command (compare app snapshots).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use xt_reconcile::{diff, AppDiff, AppSnapshot, ExtensionSnapshot};

use crate::output::{print_output, print_single, OutputFormat};

use super::CommandContext;

/// Diff command - compare two app snapshots.
///
/// Either side may be a snapshot JSON file or a project directory.
#[derive(Debug, Args)]
pub struct DiffCommand {
    /// Previous snapshot (JSON file or project directory).
    previous: PathBuf,

    /// Next snapshot (JSON file or project directory).
    next: PathBuf,

    /// Do not report extensions whose configuration changed.
    #[arg(long)]
    no_updates: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct DiffRow {
    #[tabled(rename = "CHANGE")]
    change: &'static str,
    #[tabled(rename = "UID")]
    uid: String,
    #[tabled(rename = "TYPE")]
    resource_type: String,
}

impl DiffCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let previous = load_snapshot(&self.previous)?;
        let next = load_snapshot(&self.next)?;

        let result = diff(&previous, &next, !self.no_updates);

        match ctx.format {
            OutputFormat::Json => print_single(&result),
            OutputFormat::Table => print_output(&rows(&result), ctx.format),
        }

        Ok(())
    }
}

fn rows(result: &AppDiff) -> Vec<DiffRow> {
    let tagged = |change: &'static str, list: &[ExtensionSnapshot]| -> Vec<DiffRow> {
        let mut rows: Vec<DiffRow> = list
            .iter()
            .map(|ext| DiffRow {
                change,
                uid: ext.uid.clone(),
                resource_type: ext.resource_type.to_string(),
            })
            .collect();
        rows.sort_by(|a, b| a.uid.cmp(&b.uid));
        rows
    };

    let mut out = tagged("created", &result.created);
    out.extend(tagged("updated", &result.updated));
    out.extend(tagged("deleted", &result.deleted));
    out
}

/// Load a snapshot from a JSON file, or from the extensions of a project.
fn load_snapshot(path: &Path) -> Result<AppSnapshot> {
    if path.is_dir() {
        return crate::project::Project::open(path)?.snapshot();
    }

    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))
}
