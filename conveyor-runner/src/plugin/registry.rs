//! Static plugin registry
//!
//! Built once at startup from a JSON document and never mutated, so it is
//! shared through an `Arc` and read without locks.

use conveyor_core::domain::plugin::PluginMetadata;
use conveyor_core::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    plugins: HashMap<String, PluginMetadata>,
}

#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    plugins: Arc<HashMap<String, PluginMetadata>>,
}

impl PluginRegistry {
    pub fn new(plugins: HashMap<String, PluginMetadata>) -> Self {
        Self {
            plugins: Arc::new(plugins),
        }
    }

    /// Parses `{"plugins": {"<id>": {...}}}`
    pub fn from_json(json: &str) -> Result<Self> {
        let document: RegistryDocument = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("invalid plugin registry: {}", e)))?;
        Ok(Self::new(document.plugins))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "cannot read plugin registry {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }

    pub fn get(&self, id: &str) -> Option<&PluginMetadata> {
        self.plugins.get(id)
    }

    /// Metadata of a registered plugin, or a load error
    pub fn require(&self, id: &str) -> Result<&PluginMetadata> {
        self.get(id)
            .ok_or_else(|| Error::load(id, "plugin is not registered"))
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor_core::domain::plugin::PluginKind;

    const REGISTRY: &str = r#"{
        "plugins": {
            "uppercase": {
                "location": "file:///plugins/{id}-{version}.lua",
                "version": "1.0.0",
                "input_schema": {"type": "object", "required": ["text"]}
            },
            "feed": {
                "location": "https://plugins.test/feed/{version}.lua",
                "version": "0.3.0",
                "kind": "source",
                "export": "Feed"
            }
        }
    }"#;

    #[test]
    fn test_parse_registry() {
        let registry = PluginRegistry::from_json(REGISTRY).unwrap();
        assert_eq!(registry.len(), 2);

        let feed = registry.get("feed").unwrap();
        assert_eq!(feed.kind, PluginKind::Source);
        assert_eq!(feed.export, "Feed");

        let upper = registry.require("uppercase").unwrap();
        assert_eq!(
            upper.resolve_location("uppercase", None),
            "file:///plugins/uppercase-1.0.0.lua"
        );
    }

    #[test]
    fn test_unregistered_plugin_is_load_error() {
        let registry = PluginRegistry::from_json(REGISTRY).unwrap();
        assert!(matches!(
            registry.require("missing"),
            Err(Error::Load { plugin, .. }) if plugin == "missing"
        ));
    }

    #[test]
    fn test_invalid_registry_is_configuration_error() {
        assert!(matches!(
            PluginRegistry::from_json("{\"plugins\": 3}"),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_clones_share_the_map() {
        let registry = PluginRegistry::from_json(REGISTRY).unwrap();
        let clone = registry.clone();
        assert!(Arc::ptr_eq(&registry.plugins, &clone.plugins));
    }
}
