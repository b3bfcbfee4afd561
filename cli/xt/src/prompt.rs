//! Terminal prompts for linking.

use dialoguer::{Confirm, Select};
use tracing::warn;
use xt_reconcile::{IdentifierMap, LocalSource, MatchPrompt, RemoteSource};

/// Asks on the terminal. A prompt that cannot be shown counts as a decline.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl MatchPrompt for TerminalPrompt {
    fn confirm(&self, local: &LocalSource, remote: &RemoteSource) -> bool {
        Confirm::new()
            .with_prompt(format!(
                "Link {} to the registered extension \"{}\" ({})?",
                local.local_identifier, remote.title, remote.uuid
            ))
            .default(true)
            .interact()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Prompt failed");
                false
            })
    }

    fn select_manual_match(
        &self,
        locals: &[LocalSource],
        remotes: &[RemoteSource],
    ) -> IdentifierMap {
        let mut map = IdentifierMap::default();
        let mut available: Vec<&RemoteSource> = remotes.iter().collect();

        for local in locals {
            let candidates: Vec<&RemoteSource> = available
                .iter()
                .copied()
                .filter(|r| local.accepts_type(&r.resource_type))
                .collect();
            if candidates.is_empty() {
                continue;
            }

            let mut items: Vec<String> = candidates
                .iter()
                .map(|r| format!("{} ({})", r.title, r.uuid))
                .collect();
            items.push("Create as a new extension".to_string());

            let selection = Select::new()
                .with_prompt(format!("Which registration is {}?", local.local_identifier))
                .items(&items)
                .default(0)
                .interact();

            match selection {
                Ok(index) if index < candidates.len() => {
                    let chosen = candidates[index];
                    map.insert(local.local_identifier.clone(), chosen.uuid.clone());
                    available.retain(|r| r.uuid != chosen.uuid);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Prompt failed");
                    break;
                }
            }
        }

        map
    }

    fn confirm_creation(&self, locals: &[LocalSource]) -> bool {
        let names: Vec<&str> = locals.iter().map(|l| l.local_identifier.as_str()).collect();
        Confirm::new()
            .with_prompt(format!(
                "Register {} new extension(s): {}?",
                locals.len(),
                names.join(", ")
            ))
            .default(true)
            .interact()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Prompt failed");
                false
            })
    }
}
