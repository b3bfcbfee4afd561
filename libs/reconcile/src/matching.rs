//! Matching engine between local extension projects and remote registrations.
//!
//! Matching runs in three passes:
//!
//! 1. **Saved identifiers**: a local whose saved uuid still exists remotely
//!    (with a compatible type) is confirmed without asking.
//! 2. **Name hints**: a local and a remote of the same type whose title and
//!    display name agree are proposed for confirmation.
//! 3. **Per-type grouping**: what is left is grouped by type. A type with no
//!    remote candidates is created; a single local facing a single remote is
//!    proposed for confirmation; anything else is ambiguous and surfaced whole.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::error::ReconcileError;
use crate::source::{slugify, IdentifierMap, LocalSource, RemoteSource, ResourceType};

/// A proposed pairing that needs explicit confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingMatch {
    pub local: LocalSource,
    pub remote: RemoteSource,
}

/// Sources that cannot be paired without a human choosing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Ambiguous {
    pub local: Vec<LocalSource>,
    pub remote: Vec<RemoteSource>,
}

impl Ambiguous {
    /// True if nothing is ambiguous.
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.remote.is_empty()
    }
}

/// Result of one matching pass. Never persisted directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    /// Pairings confirmed from saved identifiers.
    pub confirmed: IdentifierMap,

    /// Pairings proposed by name or by unique type.
    pub pending_confirmation: Vec<PendingMatch>,

    /// Locals with no remote counterpart.
    pub to_create: Vec<LocalSource>,

    /// Sources that need a manual choice.
    pub ambiguous: Ambiguous,

    /// Remote registrations of a type no local source has.
    pub remote_only: Vec<RemoteSource>,
}

impl MatchResult {
    /// True if every local source is already confirmed.
    pub fn is_settled(&self) -> bool {
        self.pending_confirmation.is_empty() && self.to_create.is_empty() && self.ambiguous.is_empty()
    }
}

/// Match local sources against remote registrations for one app.
///
/// `previous` is the identifier map saved by an earlier pass. If it was saved
/// for a different app the whole pass fails with `InvalidEnvironment`.
pub fn match_sources(
    app: &str,
    locals: &[LocalSource],
    remotes: &[RemoteSource],
    previous: &IdentifierMap,
) -> Result<MatchResult, ReconcileError> {
    if let Some(found) = previous.app.as_deref() {
        if found != app {
            return Err(ReconcileError::InvalidEnvironment {
                expected: app.to_string(),
                found: found.to_string(),
            });
        }
    }

    let mut result = MatchResult {
        confirmed: IdentifierMap::for_app(app),
        ..MatchResult::default()
    };
    let mut claimed: HashSet<&str> = HashSet::new();

    // Pass 1: saved identifiers.
    let mut unmatched: Vec<&LocalSource> = Vec::new();
    for local in locals {
        let saved = previous
            .get(&local.local_identifier)
            .and_then(|uuid| remotes.iter().find(|r| r.uuid == uuid));

        match saved {
            Some(remote)
                if local.accepts_type(&remote.resource_type)
                    && !claimed.contains(remote.uuid.as_str()) =>
            {
                claimed.insert(remote.uuid.as_str());
                result
                    .confirmed
                    .insert(local.local_identifier.clone(), remote.uuid.clone());
            }
            _ => unmatched.push(local),
        }
    }

    // Pass 2: name hints, only where the (type, name) key is unique on both sides.
    let mut local_keys: HashMap<(ResourceType, String), usize> = HashMap::new();
    for local in &unmatched {
        *local_keys
            .entry((local.resource_type.clone(), slugify(&local.display_name)))
            .or_default() += 1;
    }

    let mut leftover: Vec<&LocalSource> = Vec::new();
    for local in unmatched {
        let slug = slugify(&local.display_name);
        let unique_locally = local_keys
            .get(&(local.resource_type.clone(), slug.clone()))
            .copied()
            == Some(1);

        let candidates: Vec<&RemoteSource> = remotes
            .iter()
            .filter(|r| !claimed.contains(r.uuid.as_str()))
            .filter(|r| local.accepts_type(&r.resource_type) && slugify(&r.title) == slug)
            .collect();

        match candidates.as_slice() {
            [remote] if unique_locally => {
                claimed.insert(remote.uuid.as_str());
                result.pending_confirmation.push(PendingMatch {
                    local: local.clone(),
                    remote: (*remote).clone(),
                });
            }
            _ => leftover.push(local),
        }
    }

    // Pass 3: per-type grouping of whatever is left.
    let mut groups: BTreeMap<ResourceType, (Vec<&LocalSource>, Vec<&RemoteSource>)> =
        BTreeMap::new();
    for local in leftover.iter().copied() {
        groups
            .entry(local.resource_type.clone())
            .or_default()
            .0
            .push(local);
    }

    for remote in remotes.iter().filter(|r| !claimed.contains(r.uuid.as_str())) {
        let owner = leftover
            .iter()
            .find(|l| l.accepts_type(&remote.resource_type))
            .map(|l| l.resource_type.clone());

        match owner.and_then(|t| groups.get_mut(&t)) {
            Some((_, group_remotes)) => group_remotes.push(remote),
            None => result.remote_only.push(remote.clone()),
        }
    }

    for (_, (group_locals, group_remotes)) in groups {
        match (group_locals.as_slice(), group_remotes.as_slice()) {
            (_, []) => result
                .to_create
                .extend(group_locals.iter().map(|l| (*l).clone())),
            ([local], [remote]) => result.pending_confirmation.push(PendingMatch {
                local: (*local).clone(),
                remote: (*remote).clone(),
            }),
            _ => {
                result
                    .ambiguous
                    .local
                    .extend(group_locals.iter().map(|l| (*l).clone()));
                result
                    .ambiguous
                    .remote
                    .extend(group_remotes.iter().map(|r| (*r).clone()));
            }
        }
    }

    debug!(
        app,
        confirmed = result.confirmed.len(),
        pending = result.pending_confirmation.len(),
        to_create = result.to_create.len(),
        ambiguous_local = result.ambiguous.local.len(),
        ambiguous_remote = result.ambiguous.remote.len(),
        remote_only = result.remote_only.len(),
        "Matched extension sources"
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(id: &str, kind: &str, name: &str) -> LocalSource {
        LocalSource {
            local_identifier: id.to_string(),
            declared_type: kind.to_string(),
            resource_type: ResourceType::new(kind),
            display_name: name.to_string(),
        }
    }

    fn remote(uuid: &str, kind: &str, title: &str) -> RemoteSource {
        RemoteSource {
            id: format!("id_{uuid}"),
            uuid: uuid.to_string(),
            resource_type: ResourceType::new(kind),
            title: title.to_string(),
        }
    }

    fn saved(app: &str, pairs: &[(&str, &str)]) -> IdentifierMap {
        let mut map = IdentifierMap::for_app(app);
        for (l, u) in pairs {
            map.insert(*l, *u);
        }
        map
    }

    #[test]
    fn test_name_match_requires_confirmation() {
        let locals = vec![local("a", "ui", "Foo")];
        let remotes = vec![remote("u1", "ui", "Foo")];

        let result = match_sources("app", &locals, &remotes, &IdentifierMap::default()).unwrap();

        assert!(result.confirmed.is_empty());
        assert_eq!(result.pending_confirmation.len(), 1);
        assert_eq!(result.pending_confirmation[0].local.local_identifier, "a");
        assert_eq!(result.pending_confirmation[0].remote.uuid, "u1");
        assert!(result.to_create.is_empty());
        assert!(result.ambiguous.is_empty());
    }

    #[test]
    fn test_saved_identifier_is_confirmed() {
        let locals = vec![local("a", "ui", "Foo")];
        let remotes = vec![remote("u1", "ui", "Foo")];

        let result =
            match_sources("app", &locals, &remotes, &saved("app", &[("a", "u1")])).unwrap();

        assert_eq!(result.confirmed.get("a"), Some("u1"));
        assert!(result.is_settled());
    }

    #[test]
    fn test_fast_path_with_many_extensions() {
        let locals = vec![
            local("a", "ui", "Foo"),
            local("b", "ui", "Bar"),
            local("c", "function", "Baz"),
        ];
        let remotes = vec![
            remote("u1", "ui", "Foo"),
            remote("u2", "ui", "Bar"),
            remote("u3", "function", "Baz"),
        ];
        let previous = saved("app", &[("a", "u1"), ("b", "u2"), ("c", "u3")]);

        let result = match_sources("app", &locals, &remotes, &previous).unwrap();

        assert_eq!(result.confirmed.len(), 3);
        assert!(result.pending_confirmation.is_empty());
        assert!(result.to_create.is_empty());
        assert!(result.ambiguous.is_empty());
        assert!(result.remote_only.is_empty());
    }

    #[test]
    fn test_saved_identifier_for_other_app_is_invalid() {
        let locals = vec![local("a", "ui", "Foo")];
        let remotes = vec![remote("u1", "ui", "Foo")];

        let err = match_sources("app", &locals, &remotes, &saved("other", &[("a", "u1")]))
            .unwrap_err();

        assert_eq!(err.outcome(), "invalid-environment");
    }

    #[test]
    fn test_stale_saved_identifier_falls_back_to_name() {
        let locals = vec![local("a", "ui", "Foo")];
        let remotes = vec![remote("u2", "ui", "Foo")];

        let result =
            match_sources("app", &locals, &remotes, &saved("app", &[("a", "u1")])).unwrap();

        assert!(result.confirmed.is_empty());
        assert_eq!(result.pending_confirmation[0].remote.uuid, "u2");
    }

    #[test]
    fn test_duplicate_saved_uuid_confirmed_once() {
        let locals = vec![local("a", "ui", "Foo"), local("b", "ui", "Bar")];
        let remotes = vec![remote("u1", "ui", "Foo")];

        let result = match_sources(
            "app",
            &locals,
            &remotes,
            &saved("app", &[("a", "u1"), ("b", "u1")]),
        )
        .unwrap();

        assert_eq!(result.confirmed.len(), 1);
        assert_eq!(result.confirmed.get("a"), Some("u1"));
        assert_eq!(result.to_create, vec![local("b", "ui", "Bar")]);
    }

    #[test]
    fn test_unique_type_pairing_needs_confirmation() {
        let locals = vec![local("apple", "checkout_ui", "Apple")];
        let remotes = vec![remote("u1", "CHECKOUT_UI", "Pear")];

        let result = match_sources("app", &locals, &remotes, &IdentifierMap::default()).unwrap();

        assert!(result.confirmed.is_empty());
        assert_eq!(result.pending_confirmation.len(), 1);
        assert_eq!(result.pending_confirmation[0].remote.title, "Pear");
    }

    #[test]
    fn test_two_remotes_one_local_is_ambiguous() {
        let locals = vec![local("a", "ui", "Foo")];
        let remotes = vec![remote("u1", "ui", "Bar"), remote("u2", "ui", "Baz")];

        let result = match_sources("app", &locals, &remotes, &IdentifierMap::default()).unwrap();

        assert!(result.confirmed.is_empty());
        assert!(result.pending_confirmation.is_empty());
        assert_eq!(result.ambiguous.local.len(), 1);
        assert_eq!(result.ambiguous.remote.len(), 2);
    }

    #[test]
    fn test_same_type_on_both_sides_is_ambiguous() {
        let locals = vec![
            local("a", "ui", "Alpha"),
            local("a2", "ui", "Alpha Two"),
            local("b", "function", "Beta"),
        ];
        let remotes = vec![remote("u1", "ui", "One"), remote("u2", "ui", "Two")];

        let result = match_sources("app", &locals, &remotes, &IdentifierMap::default()).unwrap();

        assert_eq!(result.to_create, vec![local("b", "function", "Beta")]);
        assert_eq!(result.ambiguous.local.len(), 2);
        assert_eq!(result.ambiguous.remote.len(), 2);
    }

    #[test]
    fn test_duplicate_names_are_not_name_matched() {
        let locals = vec![local("a", "ui", "Foo"), local("a2", "ui", "Foo")];
        let remotes = vec![remote("u1", "ui", "Foo")];

        let result = match_sources("app", &locals, &remotes, &IdentifierMap::default()).unwrap();

        assert!(result.pending_confirmation.is_empty());
        assert_eq!(result.ambiguous.local.len(), 2);
        assert_eq!(result.ambiguous.remote.len(), 1);
    }

    #[test]
    fn test_missing_type_remotely_is_created() {
        let locals = vec![
            local("a", "ui", "Foo"),
            local("b", "ui", "Bar"),
            local("c", "function", "Baz"),
        ];
        let remotes = vec![remote("u1", "ui", "Foo")];

        let result = match_sources("app", &locals, &remotes, &IdentifierMap::default()).unwrap();

        assert_eq!(result.pending_confirmation.len(), 1);
        assert_eq!(result.to_create.len(), 2);
        assert!(result.ambiguous.is_empty());
    }

    #[test]
    fn test_remote_only_registrations_are_reported() {
        let locals = vec![local("a", "ui", "Foo")];
        let remotes = vec![
            remote("u1", "ui", "Foo"),
            remote("w1", "webhook", "Orders"),
            remote("w2", "webhook", "Customers"),
        ];

        let result = match_sources("app", &locals, &remotes, &IdentifierMap::default()).unwrap();

        assert_eq!(result.pending_confirmation.len(), 1);
        assert_eq!(result.remote_only.len(), 2);
        assert!(result.ambiguous.is_empty());
    }

    #[test]
    fn test_title_compared_by_slug() {
        let locals = vec![local("a", "ui", "My Extension")];
        let remotes = vec![remote("u1", "ui", "my-extension"), remote("u2", "ui", "Other")];

        let result = match_sources("app", &locals, &remotes, &IdentifierMap::default()).unwrap();

        assert_eq!(result.pending_confirmation.len(), 1);
        assert_eq!(result.pending_confirmation[0].remote.uuid, "u1");
        assert_eq!(result.remote_only.len(), 1);
        assert_eq!(result.remote_only[0].uuid, "u2");
        assert!(result.ambiguous.is_empty());
    }
}
