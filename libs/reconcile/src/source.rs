//! Local and remote sources and the identifier map between them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Resource type of an extension, as understood by the registry.
///
/// Stored lowercase so that `"CHECKOUT_UI"` and `"checkout_ui"` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ResourceType(String);

impl ResourceType {
    /// Create a normalized resource type.
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_lowercase())
    }

    /// Get the normalized string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ResourceType {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for ResourceType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<ResourceType> for String {
    fn from(value: ResourceType) -> Self {
        value.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One extension project found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalSource {
    /// Stable local key (the extension handle).
    pub local_identifier: String,

    /// Type as declared in the extension's config file.
    pub declared_type: String,

    /// Type as understood by the registry.
    pub resource_type: ResourceType,

    /// Human-facing name, compared against remote titles.
    pub display_name: String,
}

impl LocalSource {
    /// True if a remote type string refers to this source's type.
    pub fn accepts_type(&self, remote: &ResourceType) -> bool {
        &self.resource_type == remote || ResourceType::new(&self.declared_type) == *remote
    }
}

/// One registration on the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSource {
    /// Registry-internal ID.
    pub id: String,

    /// Stable cross-reference key.
    pub uuid: String,

    /// Registered resource type.
    pub resource_type: ResourceType,

    /// Registered title, the fallback matching key.
    pub title: String,
}

/// Persisted mapping from local identifier to remote uuid.
///
/// The map records which app it was produced for, so that identifiers saved for
/// one app are never silently applied to another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierMap {
    /// App this map belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,

    /// local identifier -> remote uuid.
    #[serde(default)]
    pub extensions: BTreeMap<String, String>,
}

impl IdentifierMap {
    /// Create an empty map bound to an app.
    pub fn for_app(app: impl Into<String>) -> Self {
        Self {
            app: Some(app.into()),
            extensions: BTreeMap::new(),
        }
    }

    /// Look up the uuid recorded for a local identifier.
    pub fn get(&self, local_identifier: &str) -> Option<&str> {
        self.extensions.get(local_identifier).map(String::as_str)
    }

    /// Record a pairing, returning the previous uuid if any.
    pub fn insert(
        &mut self,
        local_identifier: impl Into<String>,
        uuid: impl Into<String>,
    ) -> Option<String> {
        self.extensions.insert(local_identifier.into(), uuid.into())
    }

    /// True if any local identifier maps to this uuid.
    pub fn contains_uuid(&self, uuid: &str) -> bool {
        self.extensions.values().any(|v| v == uuid)
    }

    /// Iterate over `(local identifier, uuid)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.extensions
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of pairings.
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// True if there are no pairings.
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Merge another map's pairings into this one. Entries in `other` win.
    pub fn merge(&mut self, other: IdentifierMap) {
        self.extensions.extend(other.extensions);
    }
}

/// Normalize a title or handle for comparison.
///
/// Lowercases, and collapses every run of non-alphanumeric characters into a
/// single `-`, trimming leading/trailing separators.
pub fn slugify(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_dash = false;
    for c in value.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_normalized() {
        assert_eq!(ResourceType::new("CHECKOUT_UI"), ResourceType::new("checkout_ui"));
        assert_eq!(ResourceType::new(" Function ").as_str(), "function");
    }

    #[test]
    fn test_accepts_declared_type() {
        let local = LocalSource {
            local_identifier: "discount".to_string(),
            declared_type: "product_discounts".to_string(),
            resource_type: ResourceType::new("function"),
            display_name: "Discount".to_string(),
        };
        assert!(local.accepts_type(&ResourceType::new("FUNCTION")));
        assert!(local.accepts_type(&ResourceType::new("PRODUCT_DISCOUNTS")));
        assert!(!local.accepts_type(&ResourceType::new("ui_extension")));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("My Extension"), "my-extension");
        assert_eq!(slugify("  my__extension!! "), "my-extension");
        assert_eq!(slugify("my-extension"), "my-extension");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn test_identifier_map_serde() {
        let mut map = IdentifierMap::for_app("app_1");
        map.insert("a", "u1");
        let json = serde_json::to_string(&map).unwrap();
        let back: IdentifierMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
        assert!(back.contains_uuid("u1"));
        assert_eq!(back.get("a"), Some("u1"));
    }
}
