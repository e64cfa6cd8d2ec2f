//! Credential and environment validation
//!
//! A service handle is only constructed from a configuration that passed
//! validation. Requirements are declared up front as a list of keys with
//! constraints; validation runs once per construction and reports every
//! violation at once rather than stopping at the first, so an operator
//! fixing a deployment sees the complete list.

use std::collections::HashMap;
use std::fmt;

/// Constraint applied to a required configuration key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyConstraint {
    /// Key must be present with a non-empty value
    NonEmpty,
    /// Key must be present and parse as a JSON object (e.g. a
    /// service-account credential blob)
    JsonObject,
}

/// A single validation violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// The offending key
    pub field: String,
    /// Human-readable description of the violation
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Aggregated validation failure listing every violated key
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationError {
    errors: Vec<FieldError>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn field_errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// Whether a specific key is among the violations
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// Consume the accumulated violations, returning `Ok(())` when none
    /// were recorded
    pub fn finish(self) -> Result<(), ValidationError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation error(s)", self.errors.len())?;
        for error in &self.errors {
            write!(f, "; {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Declarative list of required configuration keys
///
/// Order is preserved so violation lists read in declaration order.
#[derive(Debug, Clone, Default)]
pub struct EnvRequirements {
    entries: Vec<(String, KeyConstraint)>,
}

impl EnvRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a key to be present and non-empty
    pub fn require(mut self, key: impl Into<String>) -> Self {
        self.entries.push((key.into(), KeyConstraint::NonEmpty));
        self
    }

    /// Require a key to hold a well-formed JSON object
    pub fn require_json(mut self, key: impl Into<String>) -> Self {
        self.entries.push((key.into(), KeyConstraint::JsonObject));
        self
    }

    /// The declared keys, in declaration order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check every declared key against the supplied values
    ///
    /// Returns a [`ValidationError`] listing all missing, empty, or
    /// malformed keys; passes only when every constraint holds.
    pub fn validate(&self, values: &HashMap<String, String>) -> Result<(), ValidationError> {
        let mut errors = ValidationError::new();

        for (key, constraint) in &self.entries {
            let Some(value) = values.get(key) else {
                errors.add(key, "required key is missing");
                continue;
            };

            match constraint {
                KeyConstraint::NonEmpty => {
                    if value.trim().is_empty() {
                        errors.add(key, "value must not be empty");
                    }
                }
                KeyConstraint::JsonObject => {
                    if value.trim().is_empty() {
                        errors.add(key, "value must not be empty");
                    } else {
                        match serde_json::from_str::<serde_json::Value>(value) {
                            Ok(serde_json::Value::Object(_)) => {}
                            Ok(_) => errors.add(key, "value must be a JSON object"),
                            Err(e) => errors.add(key, format!("malformed JSON: {e}")),
                        }
                    }
                }
            }
        }

        errors.finish()
    }

    /// Collect the declared keys from the process environment
    ///
    /// Missing variables are simply absent from the returned map and will
    /// be reported by [`EnvRequirements::validate`].
    pub fn from_process_env(&self) -> HashMap<String, String> {
        self.keys()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirements() -> EnvRequirements {
        EnvRequirements::new()
            .require("API_KEY")
            .require("API_BASE_URL")
            .require_json("SERVICE_ACCOUNT_JSON")
    }

    fn complete_values() -> HashMap<String, String> {
        HashMap::from([
            ("API_KEY".to_string(), "sk-12345".to_string()),
            ("API_BASE_URL".to_string(), "https://api.example.com".to_string()),
            ("SERVICE_ACCOUNT_JSON".to_string(), r#"{"client_email":"a@b","private_key":"k"}"#.to_string()),
        ])
    }

    /// Validates that a complete, well-formed configuration passes.
    #[test]
    fn test_complete_configuration_passes() {
        assert!(requirements().validate(&complete_values()).is_ok());
    }

    /// Validates the round-trip property: removing any single required key
    /// yields a failure flagging exactly that key.
    #[test]
    fn test_each_missing_key_flagged_individually() {
        let reqs = requirements();
        let complete = complete_values();

        for key in ["API_KEY", "API_BASE_URL", "SERVICE_ACCOUNT_JSON"] {
            let mut values = complete.clone();
            values.remove(key);

            let err = reqs.validate(&values).unwrap_err();
            assert_eq!(err.error_count(), 1, "only {key} should be flagged");
            assert!(err.has_field(key));
        }
    }

    /// Validates that all violations are reported at once, not just the
    /// first one encountered.
    #[test]
    fn test_all_violations_reported() {
        let err = requirements().validate(&HashMap::new()).unwrap_err();
        assert_eq!(err.error_count(), 3);
        assert!(err.has_field("API_KEY"));
        assert!(err.has_field("API_BASE_URL"));
        assert!(err.has_field("SERVICE_ACCOUNT_JSON"));
    }

    /// Validates empty and whitespace-only values are rejected.
    #[test]
    fn test_empty_value_rejected() {
        let mut values = complete_values();
        values.insert("API_KEY".to_string(), "   ".to_string());

        let err = requirements().validate(&values).unwrap_err();
        assert_eq!(err.error_count(), 1);
        assert!(err.has_field("API_KEY"));
    }

    /// Validates the JSON-object constraint: malformed JSON and non-object
    /// JSON both fail, while nested objects pass.
    #[test]
    fn test_json_blob_constraint() {
        let reqs = EnvRequirements::new().require_json("BLOB");

        let malformed = HashMap::from([("BLOB".to_string(), "{not json".to_string())]);
        assert!(reqs.validate(&malformed).unwrap_err().has_field("BLOB"));

        let array = HashMap::from([("BLOB".to_string(), "[1,2,3]".to_string())]);
        assert!(reqs.validate(&array).unwrap_err().has_field("BLOB"));

        let object = HashMap::from([("BLOB".to_string(), r#"{"a":{"b":1}}"#.to_string())]);
        assert!(reqs.validate(&object).is_ok());
    }

    /// Validates display output includes the per-field messages.
    #[test]
    fn test_display_lists_fields() {
        let mut err = ValidationError::new();
        err.add("API_KEY", "required key is missing");
        let rendered = err.to_string();
        assert!(rendered.contains("1 validation error(s)"));
        assert!(rendered.contains("API_KEY"));
    }
}
