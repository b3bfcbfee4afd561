//! Extension model.
//!
//! The kind of an extension decides how it is registered, whether it can be
//! pushed as a draft and which auxiliary features it enables. Each kind carries
//! only the fields that matter to it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use xt_reconcile::{ExtensionSnapshot, LocalSource, ResourceType};

/// Closed set of extension kinds, tagged by the `type` field of the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtensionKind {
    /// UI extension rendered at one or more targets.
    UiExtension {
        #[serde(default)]
        targets: Vec<String>,
    },

    /// Server-side function implementing a platform API.
    Function { api: String },

    /// Theme app extension.
    Theme,

    /// Webhook subscription.
    Webhook {
        #[serde(default)]
        topics: Vec<String>,
    },

    /// App-level configuration section.
    AppConfig,
}

impl ExtensionKind {
    /// Type as understood by the registry.
    pub fn resource_type(&self) -> ResourceType {
        ResourceType::new(match self {
            ExtensionKind::UiExtension { .. } => "ui_extension",
            ExtensionKind::Function { .. } => "function",
            ExtensionKind::Theme => "theme_app_extension",
            ExtensionKind::Webhook { .. } => "webhook_subscription",
            ExtensionKind::AppConfig => "app_config",
        })
    }

    /// Type as written by the developer.
    ///
    /// Functions are declared by the API they implement.
    pub fn declared_type(&self) -> String {
        match self {
            ExtensionKind::UiExtension { .. } => "ui_extension".to_string(),
            ExtensionKind::Function { api } => api.clone(),
            ExtensionKind::Theme => "theme".to_string(),
            ExtensionKind::Webhook { .. } => "webhook".to_string(),
            ExtensionKind::AppConfig => "app_config".to_string(),
        }
    }

    /// True if this kind is live-updated through drafts.
    pub fn is_draftable(&self) -> bool {
        matches!(
            self,
            ExtensionKind::UiExtension { .. } | ExtensionKind::Function { .. } | ExtensionKind::Theme
        )
    }
}

/// One extension project on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Extension {
    /// Stable local key.
    pub handle: String,

    /// Session-stable ID used for snapshots.
    pub uid: String,

    /// Human-facing name.
    pub name: String,

    /// Project directory.
    pub directory: PathBuf,

    pub kind: ExtensionKind,

    /// Full configuration as loaded.
    pub configuration: serde_json::Value,
}

impl Extension {
    pub fn resource_type(&self) -> ResourceType {
        self.kind.resource_type()
    }

    pub fn is_draftable(&self) -> bool {
        self.kind.is_draftable()
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, ExtensionKind::Function { .. })
    }

    /// Matching view of this extension.
    pub fn to_local_source(&self) -> LocalSource {
        LocalSource {
            local_identifier: self.handle.clone(),
            declared_type: self.kind.declared_type(),
            resource_type: self.resource_type(),
            display_name: self.name.clone(),
        }
    }

    /// Diffing view of this extension.
    pub fn to_snapshot(&self) -> ExtensionSnapshot {
        ExtensionSnapshot {
            uid: self.uid.clone(),
            resource_type: self.resource_type(),
            configuration: self.configuration.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_manifest_json() {
        let kind: ExtensionKind = serde_json::from_value(serde_json::json!({
            "type": "function",
            "api": "product_discounts",
            "name": "ignored",
        }))
        .unwrap();
        assert_eq!(
            kind,
            ExtensionKind::Function {
                api: "product_discounts".to_string()
            }
        );
        assert_eq!(kind.declared_type(), "product_discounts");
        assert_eq!(kind.resource_type().as_str(), "function");
    }

    #[test]
    fn test_draftable_kinds() {
        assert!(ExtensionKind::Theme.is_draftable());
        assert!(ExtensionKind::UiExtension { targets: vec![] }.is_draftable());
        assert!(!ExtensionKind::Webhook { topics: vec![] }.is_draftable());
        assert!(!ExtensionKind::AppConfig.is_draftable());
    }

    #[test]
    fn test_local_source_accepts_declared_type() {
        let ext = Extension {
            handle: "discount".to_string(),
            uid: "discount".to_string(),
            name: "Discount".to_string(),
            directory: PathBuf::from("extensions/discount"),
            kind: ExtensionKind::Function {
                api: "product_discounts".to_string(),
            },
            configuration: serde_json::json!({}),
        };
        let local = ext.to_local_source();
        assert!(local.accepts_type(&ResourceType::new("PRODUCT_DISCOUNTS")));
        assert!(local.accepts_type(&ResourceType::new("function")));
    }
}
