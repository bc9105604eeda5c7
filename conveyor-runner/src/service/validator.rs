//! JSON Schema validation at the step checkpoints

use conveyor_core::{Checkpoint, Error, Result};
use serde_json::Value;

/// Checks `data` against `schema`, returning the data untouched on success
///
/// A schema that does not compile is a configuration error of the plugin
/// registry, not a validation failure of the data.
pub fn validate<'a>(
    schema: &Value,
    data: &'a Value,
    checkpoint: Checkpoint,
    context: &str,
) -> Result<&'a Value> {
    let validator = jsonschema::validator_for(schema).map_err(|e| {
        Error::Configuration(format!("invalid {} schema for {}: {}", checkpoint, context, e))
    })?;

    let errors: Vec<String> = validator
        .iter_errors(data)
        .map(|e| format!("{} at '{}'", e, e.instance_path))
        .collect();

    if !errors.is_empty() {
        return Err(Error::Validation {
            checkpoint,
            context: context.to_string(),
            errors,
        });
    }
    Ok(data)
}
