//! App diff engine.

use serde::Serialize;

use crate::snapshot::{AppSnapshot, ExtensionSnapshot};

/// Classification of every extension that differs between two snapshots.
///
/// The three lists carry no ordering guarantee.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppDiff {
    pub created: Vec<ExtensionSnapshot>,
    pub updated: Vec<ExtensionSnapshot>,
    pub deleted: Vec<ExtensionSnapshot>,
}

impl AppDiff {
    /// True if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Total number of classified extensions.
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }
}

/// Compare two snapshots.
///
/// Extensions are paired by `uid`. Configurations compare structurally. With
/// `include_updates` false, in-place edits are not reported at all.
pub fn diff(previous: &AppSnapshot, next: &AppSnapshot, include_updates: bool) -> AppDiff {
    let mut out = AppDiff::default();

    for ext in next.iter() {
        match previous.get(&ext.uid) {
            None => out.created.push(ext.clone()),
            Some(old) if old.configuration == ext.configuration => {}
            Some(_) => {
                if include_updates {
                    out.updated.push(ext.clone());
                }
            }
        }
    }

    out.deleted.extend(
        previous
            .iter()
            .filter(|ext| !next.contains(&ext.uid))
            .cloned(),
    );

    out
}
