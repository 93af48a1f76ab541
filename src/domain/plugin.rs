//! Plugin domain type (§3 Plugin, §4.5 Sandbox Runtime)

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record, now_ms};

use super::id::generate_id;

/// Lifecycle state of a plugin's sandbox binding. Distinct from the sandbox
/// worker's own process lifecycle (`spawning`/`running`/...) — this tracks
/// whether the plugin is currently bound to a loaded worker at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PluginLifecycle {
    #[default]
    Unloaded,
    Loaded,
}

impl std::fmt::Display for PluginLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unloaded => write!(f, "unloaded"),
            Self::Loaded => write!(f, "loaded"),
        }
    }
}

/// An installed extension. §3 invariant: `loaded` implies `approved` for the
/// same `version`, and (if enforced) a matching signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plugin {
    pub id: String,
    pub name: String,
    pub version: String,
    pub manifest: serde_json::Value,
    pub entry_point_bytes: Vec<u8>,
    pub approved_version: Option<String>,
    pub signature: Option<String>,
    pub lifecycle: PluginLifecycle,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Raised when a caller attempts to bind a plugin to a loaded worker without
/// a matching approval or signature.
#[derive(Debug, thiserror::Error)]
pub enum PluginBindingError {
    #[error("plugin {0} has no approval for version {1}")]
    NotApproved(String, String),
    #[error("plugin {0} signature does not match the stored value")]
    SignatureMismatch(String),
}

impl Plugin {
    pub fn new(name: impl Into<String>, version: impl Into<String>, manifest: serde_json::Value, entry_point_bytes: Vec<u8>) -> Self {
        let name = name.into();
        let now = now_ms();
        Self {
            id: generate_id("plugin", &name),
            name,
            version: version.into(),
            manifest,
            entry_point_bytes,
            approved_version: None,
            signature: None,
            lifecycle: PluginLifecycle::Unloaded,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn approve_version(&mut self, version: impl Into<String>) {
        self.approved_version = Some(version.into());
        self.updated_at = now_ms();
    }

    /// §4.5: loading requires an approval whose version matches the manifest's,
    /// and (if `expected_signature` is `Some`) a matching HMAC over the entry bytes.
    pub fn check_load_binding(&self, expected_signature: Option<&str>) -> Result<(), PluginBindingError> {
        if self.approved_version.as_deref() != Some(self.version.as_str()) {
            return Err(PluginBindingError::NotApproved(self.name.clone(), self.version.clone()));
        }
        if let Some(expected) = expected_signature
            && self.signature.as_deref() != Some(expected)
        {
            return Err(PluginBindingError::SignatureMismatch(self.name.clone()));
        }
        Ok(())
    }

    pub fn mark_loaded(&mut self) {
        self.lifecycle = PluginLifecycle::Loaded;
        self.updated_at = now_ms();
    }

    pub fn mark_unloaded(&mut self) {
        self.lifecycle = PluginLifecycle::Unloaded;
        self.updated_at = now_ms();
    }
}

impl Record for Plugin {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "plugins"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("name".to_string(), IndexValue::String(self.name.clone()));
        fields.insert("lifecycle".to_string(), IndexValue::String(self.lifecycle.to_string()));
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unapproved_plugin_fails_load_binding() {
        let plugin = Plugin::new("echoer", "1.0.0", serde_json::json!({}), vec![1, 2, 3]);
        assert!(matches!(
            plugin.check_load_binding(None),
            Err(PluginBindingError::NotApproved(_, _))
        ));
    }

    #[test]
    fn approved_matching_version_passes_without_signature_check() {
        let mut plugin = Plugin::new("echoer", "1.0.0", serde_json::json!({}), vec![1, 2, 3]);
        plugin.approve_version("1.0.0");
        assert!(plugin.check_load_binding(None).is_ok());
    }

    #[test]
    fn signature_mismatch_is_rejected_when_enforced() {
        let mut plugin = Plugin::new("echoer", "1.0.0", serde_json::json!({}), vec![1, 2, 3]);
        plugin.approve_version("1.0.0");
        plugin.signature = Some("abc123".to_string());
        assert!(matches!(
            plugin.check_load_binding(Some("def456")),
            Err(PluginBindingError::SignatureMismatch(_))
        ));
        assert!(plugin.check_load_binding(Some("abc123")).is_ok());
    }

    #[test]
    fn approving_an_older_version_does_not_satisfy_a_newer_manifest() {
        let mut plugin = Plugin::new("echoer", "2.0.0", serde_json::json!({}), vec![]);
        plugin.approve_version("1.0.0");
        assert!(matches!(
            plugin.check_load_binding(None),
            Err(PluginBindingError::NotApproved(_, _))
        ));
    }
}
