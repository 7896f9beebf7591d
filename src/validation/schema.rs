//! Event Schema Validation
//!
//! Payload shape is owned by whoever declares the event type, not by the
//! ledger. The writer only consumes the [`EventSchemaValidator`] interface;
//! [`SchemaRegistry`] is a small declarative implementation loaded from YAML.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::GovernanceError;

/// A single schema failure at a payload path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Schema validation failed: {}", format_violations(.violations))]
pub struct SchemaError {
    pub violations: Vec<SchemaViolation>,
}

impl SchemaError {
    pub fn new(violations: Vec<SchemaViolation>) -> Self {
        Self { violations }
    }

    fn single(path: &str, message: impl Into<String>) -> Self {
        Self::new(vec![SchemaViolation {
            path: path.to_string(),
            message: message.into(),
        }])
    }
}

fn format_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}

/// The parts of an event a validator may inspect before it is sealed
#[derive(Debug, Clone, Copy)]
pub struct EventDraft<'a> {
    pub agent: &'a str,
    pub track: &'a str,
    pub event_type: &'a str,
    pub payload: &'a Value,
}

pub trait EventSchemaValidator: Send + Sync {
    /// Ok when the event satisfies its declared schema, or when none is declared
    fn validate(&self, event: &EventDraft<'_>) -> Result<(), SchemaError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
    Any,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Null => value.is_null(),
            Self::Any => true,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Null => "null",
            Self::Any => "any",
        }
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

#[derive(Debug, Clone, Deserialize)]
pub struct EventSchema {
    #[serde(default)]
    pub required: BTreeMap<String, FieldType>,
    #[serde(default)]
    pub optional: BTreeMap<String, FieldType>,
    #[serde(default = "default_additional_fields")]
    pub additional_fields: bool,
}

fn default_additional_fields() -> bool {
    true
}

/// Declarative per-event-type payload schemas
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaRegistry {
    #[serde(default)]
    pub event_types: BTreeMap<String, EventSchema>,
}

impl SchemaRegistry {
    /// Load a registry from a YAML file
    pub fn load(path: &Path) -> Result<Self, GovernanceError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| GovernanceError::io(format!("Failed to read schema file {:?}", path), e))?;
        let registry = Self::from_yaml(&contents)?;
        info!(
            "Loaded {} event schemas from {:?}",
            registry.event_types.len(),
            path
        );
        Ok(registry)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, GovernanceError> {
        serde_yaml::from_str(contents)
            .map_err(|e| GovernanceError::Config(format!("Failed to parse event schemas: {}", e)))
    }

    pub fn declares(&self, event_type: &str) -> bool {
        self.event_types.contains_key(event_type)
    }
}

impl EventSchemaValidator for SchemaRegistry {
    fn validate(&self, event: &EventDraft<'_>) -> Result<(), SchemaError> {
        if event.event_type.is_empty() {
            return Err(SchemaError::single("event_type", "event_type must not be empty"));
        }

        let Some(schema) = self.event_types.get(event.event_type) else {
            debug!("No schema declared for event type {}", event.event_type);
            return Ok(());
        };

        let Some(fields) = event.payload.as_object() else {
            return Err(SchemaError::single(
                "payload",
                format!("expected object, found {}", json_type_name(event.payload)),
            ));
        };

        let mut violations = Vec::new();

        for (name, expected) in &schema.required {
            match fields.get(name) {
                None => violations.push(SchemaViolation {
                    path: format!("payload/{}", name),
                    message: "required field missing".to_string(),
                }),
                Some(value) if !expected.matches(value) => violations.push(SchemaViolation {
                    path: format!("payload/{}", name),
                    message: format!(
                        "expected {}, found {}",
                        expected.name(),
                        json_type_name(value)
                    ),
                }),
                Some(_) => {}
            }
        }

        for (name, value) in fields {
            if schema.required.contains_key(name) {
                continue;
            }
            match schema.optional.get(name) {
                Some(expected) if !expected.matches(value) => violations.push(SchemaViolation {
                    path: format!("payload/{}", name),
                    message: format!(
                        "expected {}, found {}",
                        expected.name(),
                        json_type_name(value)
                    ),
                }),
                Some(_) => {}
                None if !schema.additional_fields => violations.push(SchemaViolation {
                    path: format!("payload/{}", name),
                    message: "field not permitted by schema".to_string(),
                }),
                None => {}
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            violations.sort_by(|a, b| a.path.cmp(&b.path));
            Err(SchemaError::new(violations))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMAS: &str = r#"
event_types:
  event_heartbeat:
    required:
      uptime_secs: integer
      status: string
  event_anchor_created:
    required:
      root: string
    optional:
      window: object
    additional_fields: false
"#;

    fn draft<'a>(event_type: &'a str, payload: &'a Value) -> EventDraft<'a> {
        EventDraft {
            agent: "recorder",
            track: "insider",
            event_type,
            payload,
        }
    }

    #[test]
    fn test_valid_payload_passes() {
        let registry = SchemaRegistry::from_yaml(SCHEMAS).unwrap();
        let payload = json!({"uptime_secs": 30, "status": "ok", "extra": [1]});
        assert!(registry.validate(&draft("event_heartbeat", &payload)).is_ok());
    }

    #[test]
    fn test_undeclared_event_type_passes() {
        let registry = SchemaRegistry::from_yaml(SCHEMAS).unwrap();
        let payload = json!("free-form");
        assert!(!registry.declares("GENESIS"));
        assert!(registry.validate(&draft("GENESIS", &payload)).is_ok());
    }

    #[test]
    fn test_violations_list_every_path() {
        let registry = SchemaRegistry::from_yaml(SCHEMAS).unwrap();
        let payload = json!({"uptime_secs": "long"});
        let err = registry
            .validate(&draft("event_heartbeat", &payload))
            .unwrap_err();

        assert_eq!(err.violations.len(), 2);
        assert_eq!(err.violations[0].path, "payload/status");
        assert_eq!(err.violations[0].message, "required field missing");
        assert_eq!(err.violations[1].path, "payload/uptime_secs");
        assert_eq!(err.violations[1].message, "expected integer, found string");
        assert!(err.to_string().contains(" | "));
    }

    #[test]
    fn test_closed_schema_rejects_unknown_fields() {
        let registry = SchemaRegistry::from_yaml(SCHEMAS).unwrap();
        let payload = json!({"root": "ab", "window": [], "operator": "x"});
        let err = registry
            .validate(&draft("event_anchor_created", &payload))
            .unwrap_err();

        let paths: Vec<&str> = err.violations.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["payload/operator", "payload/window"]);
    }

    #[test]
    fn test_non_object_payload_rejected_when_declared() {
        let registry = SchemaRegistry::from_yaml(SCHEMAS).unwrap();
        let payload = json!([1, 2]);
        let err = registry
            .validate(&draft("event_heartbeat", &payload))
            .unwrap_err();
        assert_eq!(err.violations[0].path, "payload");
    }
}
