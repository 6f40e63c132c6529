//! # Lead Normalizer
//!
//! Maps a raw, loosely-structured webhook payload into the canonical contact
//! field set. Everything here is pure: no I/O, no clock, no allocation beyond
//! the result.
//!
//! Empty values never survive normalization. A field is either present with
//! meaningful content or absent from the result.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Maximum stored phone length after stripping
pub const MAX_PHONE_LENGTH: usize = 50;

/// Recognized campaign attribution parameters
pub const UTM_KEYS: [&str; 5] = [
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
];

/// Canonical contact fields extracted from a lead payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedLead {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// UTM parameters present in the payload
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attribution: BTreeMap<String, String>,
}

impl NormalizedLead {
    /// Render the lead as a flat mapping with absent fields omitted
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        let scalar_fields = [
            ("email", &self.email),
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
            ("name", &self.name),
            ("phone", &self.phone),
            ("company", &self.company),
            ("job_title", &self.job_title),
            ("notes", &self.notes),
        ];

        for (key, value) in scalar_fields {
            if let Some(value) = value {
                map.insert(key.to_string(), Value::String(value.clone()));
            }
        }

        if !self.attribution.is_empty() {
            let attribution = self
                .attribution
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            map.insert("attribution".to_string(), Value::Object(attribution));
        }

        map
    }

    /// True when nothing usable was extracted
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Errors raised while normalizing a payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizationError {
    #[error("Lead payload must be a JSON object, got {found}")]
    NotAnObject { found: String },
}

/// Normalize a raw lead payload
///
/// # Errors
///
/// Returns [`NormalizationError::NotAnObject`] when the payload is not a JSON
/// object. Individual malformed fields are treated as absent, not as errors.
///
/// # Examples
///
/// ```rust
/// use lead_keeper_core::normalizer::normalize;
///
/// let lead = normalize(&serde_json::json!({
///     "email": "A@B.com ",
///     "first_name": "Ann",
/// }))
/// .unwrap();
///
/// assert_eq!(lead.email.as_deref(), Some("a@b.com"));
/// assert_eq!(lead.name.as_deref(), Some("Ann"));
/// assert!(lead.phone.is_none());
/// ```
pub fn normalize(raw: &Value) -> Result<NormalizedLead, NormalizationError> {
    let object = raw
        .as_object()
        .ok_or_else(|| NormalizationError::NotAnObject {
            found: json_type_name(raw).to_string(),
        })?;

    let first_name = text_field(object, &["first_name", "firstname"]);
    let last_name = text_field(object, &["last_name", "lastname"]);
    let name = text_field(object, &["name", "full_name"])
        .or_else(|| display_name(first_name.as_deref(), last_name.as_deref()));

    let attribution = UTM_KEYS
        .iter()
        .filter_map(|key| text_field(object, &[*key]).map(|value| (key.to_string(), value)))
        .collect();

    Ok(NormalizedLead {
        email: text_field(object, &["email"]).and_then(|e| normalize_email(&e)),
        first_name,
        last_name,
        name,
        phone: text_field(object, &["phone"]).and_then(|p| normalize_phone(&p)),
        company: text_field(object, &["company"]),
        job_title: text_field(object, &["job_title", "title"]),
        notes: text_field(object, &["notes", "message"]),
        attribution,
    })
}

/// Trim and lower-case an email address; empty input becomes `None`
pub fn normalize_email(email: &str) -> Option<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        None
    } else {
        Some(email)
    }
}

/// Keep digits and a leading plus sign, truncated to [`MAX_PHONE_LENGTH`]
pub fn normalize_phone(phone: &str) -> Option<String> {
    let trimmed = phone.trim();
    let mut normalized = String::with_capacity(trimmed.len());

    if trimmed.starts_with('+') {
        normalized.push('+');
    }
    normalized.extend(trimmed.chars().filter(|c| c.is_ascii_digit()));
    normalized.truncate(MAX_PHONE_LENGTH);

    if normalized.is_empty() || normalized == "+" {
        None
    } else {
        Some(normalized)
    }
}

/// Join first and last name with a single space
fn display_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    let joined = [first, last]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

/// First non-empty textual value among `keys`
fn text_field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .filter_map(scalar_text)
        .find(|value| !value.is_empty())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[path = "normalizer_tests.rs"]
mod tests;
