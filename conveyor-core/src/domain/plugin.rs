//! Plugin metadata domain types

use serde::{Deserialize, Serialize};

/// Static registry entry describing where a plugin lives and what it accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Location template, e.g. `https://plugins.example.com/{id}/{version}/plugin.lua`
    pub location: String,
    /// Default version substituted when a step does not pin one
    pub version: String,
    #[serde(default)]
    pub kind: PluginKind,
    /// Name of the constructor exported by the plugin script
    #[serde(default = "default_export")]
    pub export: String,
    #[serde(default = "permissive_schema")]
    pub config_schema: serde_json::Value,
    #[serde(default = "permissive_schema")]
    pub input_schema: serde_json::Value,
    #[serde(default = "permissive_schema")]
    pub output_schema: serde_json::Value,
}

impl PluginMetadata {
    /// Substitutes `{id}` and `{version}` into the location template
    pub fn resolve_location(&self, id: &str, version: Option<&str>) -> String {
        self.location
            .replace("{id}", id)
            .replace("{version}", version.unwrap_or(&self.version))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    #[default]
    Processor,
    Source,
}

fn default_export() -> String {
    "Plugin".to_string()
}

fn permissive_schema() -> serde_json::Value {
    serde_json::json!({})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_location_uses_default_version() {
        let meta: PluginMetadata = serde_json::from_value(serde_json::json!({
            "location": "https://plugins.test/{id}/{version}/plugin.lua",
            "version": "1.2.0"
        }))
        .unwrap();

        assert_eq!(
            meta.resolve_location("uppercase", None),
            "https://plugins.test/uppercase/1.2.0/plugin.lua"
        );
        assert_eq!(
            meta.resolve_location("uppercase", Some("2.0.0")),
            "https://plugins.test/uppercase/2.0.0/plugin.lua"
        );
        assert_eq!(meta.export, "Plugin");
        assert_eq!(meta.kind, PluginKind::Processor);
    }
}
