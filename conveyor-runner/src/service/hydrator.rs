//! Secret hydration of step configuration
//!
//! Only the `secrets` sub-object of a config is templated. Placeholders
//! look like `{{NAME}}`; every referenced name must resolve or nothing is
//! substituted at all.

use conveyor_core::{Error, Result};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

const SECRETS_KEY: &str = "secrets";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

/// Source of secret values
pub trait SecretProvider: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// Reads secrets from environment variables of the same name
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl SecretProvider for EnvSecrets {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Fixed set of secret values
#[derive(Clone, Default)]
pub struct SecretSet {
    values: HashMap<String, String>,
}

impl SecretSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.values.insert(name.to_string(), value.to_string());
        self
    }
}

impl std::fmt::Debug for SecretSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.values.keys().collect();
        names.sort();
        f.debug_struct("SecretSet").field("names", &names).finish()
    }
}

impl SecretProvider for SecretSet {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// Substitutes placeholders in `config.secrets`
///
/// Only names in `declared` are resolvable. Without a `secrets` object the
/// config is returned unchanged.
pub fn hydrate(config: &Value, declared: &[String], provider: &dyn SecretProvider) -> Result<Value> {
    let Some(secrets) = config.get(SECRETS_KEY).filter(|s| s.is_object()) else {
        return Ok(config.clone());
    };

    let template = serde_json::to_string(secrets)
        .map_err(|e| Error::Configuration(format!("cannot serialize secrets: {}", e)))?;

    let referenced: BTreeSet<&str> = PLACEHOLDER
        .captures_iter(&template)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if referenced.is_empty() {
        return Ok(config.clone());
    }

    let mut values = HashMap::new();
    let mut missing = Vec::new();
    for name in &referenced {
        let value = declared
            .iter()
            .any(|d| d == name)
            .then(|| provider.get(name))
            .flatten();
        match value {
            Some(value) => {
                values.insert(*name, value);
            }
            None => missing.push(*name),
        }
    }
    if !missing.is_empty() {
        return Err(Error::Configuration(format!(
            "unresolved secrets: {}",
            missing.join(", ")
        )));
    }

    let substituted = PLACEHOLDER.replace_all(&template, |caps: &regex::Captures| {
        values
            .get(&caps[1])
            .map(|v| escape_for_json_string(v))
            .unwrap_or_default()
    });
    let hydrated: Value = serde_json::from_str(&substituted)
        .map_err(|e| Error::Configuration(format!("hydrated secrets are not valid JSON: {}", e)))?;

    let mut merged = config.clone();
    if let Some(object) = merged.as_object_mut() {
        object.insert(SECRETS_KEY.to_string(), hydrated);
    }
    Ok(merged)
}

/// Value as it must appear inside a JSON string literal
fn escape_for_json_string(value: &str) -> String {
    let quoted = Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn declared(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_no_secrets_is_noop() {
        let config = json!({"url": "https://{{HOST}}/x", "retries": 3});
        let hydrated = hydrate(&config, &[], &SecretSet::new()).unwrap();
        assert_eq!(hydrated, config);
    }

    #[test]
    fn test_no_placeholders_round_trips() {
        let config = json!({"secrets": {"token": "literal", "nested": [1, {"a": null}]}});
        let hydrated = hydrate(&config, &[], &SecretSet::new()).unwrap();
        assert_eq!(hydrated, config);
    }

    #[test]
    fn test_substitutes_only_inside_secrets() {
        let config = json!({
            "greeting": "hello {{API_TOKEN}}",
            "secrets": {"token": "Bearer {{API_TOKEN}}", "user": "{{ USER_NAME }}"}
        });
        let secrets = SecretSet::new()
            .with("API_TOKEN", "s3cr3t")
            .with("USER_NAME", "bob");

        let hydrated = hydrate(&config, &declared(&["API_TOKEN", "USER_NAME"]), &secrets).unwrap();
        assert_eq!(
            hydrated,
            json!({
                "greeting": "hello {{API_TOKEN}}",
                "secrets": {"token": "Bearer s3cr3t", "user": "bob"}
            })
        );
    }

    #[test]
    fn test_fails_closed_on_unresolved_name() {
        let config = json!({"secrets": {"a": "{{KNOWN}}", "b": "{{UNKNOWN}}"}});
        let secrets = SecretSet::new().with("KNOWN", "k");

        let err = hydrate(&config, &declared(&["KNOWN", "UNKNOWN"]), &secrets).unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("UNKNOWN") && !msg.contains("KNOWN,")));
    }

    #[test]
    fn test_undeclared_names_do_not_resolve() {
        let config = json!({"secrets": {"a": "{{KNOWN}}"}});
        let secrets = SecretSet::new().with("KNOWN", "k");
        assert!(hydrate(&config, &[], &secrets).is_err());
    }

    #[test]
    fn test_values_are_json_escaped() {
        let config = json!({"secrets": {"password": "{{PW}}"}});
        let secrets = SecretSet::new().with("PW", "a\"b\\c\nd");

        let hydrated = hydrate(&config, &declared(&["PW"]), &secrets).unwrap();
        assert_eq!(hydrated["secrets"]["password"], "a\"b\\c\nd");
    }

    #[test]
    fn test_debug_hides_values() {
        let secrets = SecretSet::new().with("PW", "hunter2");
        assert!(!format!("{:?}", secrets).contains("hunter2"));
    }
}
