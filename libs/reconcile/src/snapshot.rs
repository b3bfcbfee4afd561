//! App snapshots and configuration fingerprints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::source::ResourceType;

/// One extension as seen at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSnapshot {
    /// Caller-assigned ID, stable across rebuilds of the same extension.
    pub uid: String,

    /// Resource type of the extension.
    pub resource_type: ResourceType,

    /// Full configuration as loaded.
    #[serde(default)]
    pub configuration: serde_json::Value,
}

impl ExtensionSnapshot {
    /// Fingerprint of this extension's configuration.
    pub fn config_hash(&self) -> ConfigHash {
        ConfigHash::from_json(&self.configuration)
    }
}

/// Every extension of an app, keyed by `uid`. Order is irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<ExtensionSnapshot>", into = "Vec<ExtensionSnapshot>")]
pub struct AppSnapshot {
    extensions: BTreeMap<String, ExtensionSnapshot>,
}

impl AppSnapshot {
    /// Build a snapshot. A repeated `uid` keeps the last entry.
    pub fn new(extensions: impl IntoIterator<Item = ExtensionSnapshot>) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|ext| (ext.uid.clone(), ext))
                .collect(),
        }
    }

    /// Look up an extension by uid.
    pub fn get(&self, uid: &str) -> Option<&ExtensionSnapshot> {
        self.extensions.get(uid)
    }

    /// True if the snapshot contains this uid.
    pub fn contains(&self, uid: &str) -> bool {
        self.extensions.contains_key(uid)
    }

    /// Iterate over extensions.
    pub fn iter(&self) -> impl Iterator<Item = &ExtensionSnapshot> {
        self.extensions.values()
    }

    /// Number of extensions.
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// True if the snapshot has no extensions.
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}

impl From<Vec<ExtensionSnapshot>> for AppSnapshot {
    fn from(value: Vec<ExtensionSnapshot>) -> Self {
        Self::new(value)
    }
}

impl From<AppSnapshot> for Vec<ExtensionSnapshot> {
    fn from(value: AppSnapshot) -> Self {
        value.extensions.into_values().collect()
    }
}

impl FromIterator<ExtensionSnapshot> for AppSnapshot {
    fn from_iter<T: IntoIterator<Item = ExtensionSnapshot>>(iter: T) -> Self {
        Self::new(iter)
    }
}

/// A configuration hash for deterministic comparison.
///
/// Key order in objects does not affect the hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfigHash(String);

impl ConfigHash {
    /// Compute a hash from canonical JSON.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let canonical = canonical_json(json);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let result = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&result[..16])))
    }

    /// Get the hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Produce canonical JSON (sorted keys, no extra whitespace).
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("{}:{}", quote(k), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        serde_json::Value::String(s) => quote(s),
        other => other.to_string(),
    }
}

fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}
