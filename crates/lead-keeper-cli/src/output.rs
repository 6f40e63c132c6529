//! Rendering of API responses

use crate::{CliError, OutputFormat};
use serde::Serialize;
use serde_json::Value;

/// Render a serializable value in the requested format
pub fn render<T: Serialize>(value: &T, format: &OutputFormat) -> Result<String, CliError> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(value).map_err(|e| CliError::Output {
            message: e.to_string(),
        }),
        OutputFormat::Yaml => serde_yaml::to_string(value).map_err(|e| CliError::Output {
            message: e.to_string(),
        }),
        OutputFormat::Text => {
            let value = serde_json::to_value(value).map_err(|e| CliError::Output {
                message: e.to_string(),
            })?;
            Ok(render_text(&value))
        }
    }
}

/// Plain `key: value` lines; array items are separated by a blank line
fn render_text(value: &Value) -> String {
    match value {
        Value::Array(items) if items.is_empty() => "(none)".to_string(),
        Value::Array(items) => items
            .iter()
            .map(render_text)
            .collect::<Vec<_>>()
            .join("\n\n"),
        Value::Object(map) => {
            let width = map.keys().map(String::len).max().unwrap_or(0);
            map.iter()
                .map(|(key, value)| format!("{:width$}  {}", key, scalar(value), width = width))
                .collect::<Vec<_>>()
                .join("\n")
        }
        other => scalar(other),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
