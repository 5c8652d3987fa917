//! Materialized input snapshots.
//!
//! The engine performs no network I/O: the extraction layer dumps the
//! source field inventory, the per-context assignments, and the target
//! field snapshot to JSON files, and this module loads them. Malformed
//! allowed-values payloads inside a single assignment degrade to "no
//! data" instead of failing the file, so one corrupt row cannot halt a
//! run.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::warn;

use crate::model::{AllowedValuesDescriptor, FieldAssignment, SourceField, TargetField};

/// Errors while loading a snapshot file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SnapshotError {
    /// The file could not be read.
    #[error("failed to read snapshot file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid JSON of the expected shape.
    #[error("failed to parse snapshot: {0}")]
    Parse(#[from] serde_json::Error),

    /// The top level of the file is not a JSON object.
    #[error("snapshot top level must be a JSON object")]
    NotAnObject,
}

/// Everything extracted from the source system.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceSnapshot {
    /// Field inventory.
    #[serde(default)]
    pub fields: Vec<SourceField>,
    /// Per-context assignments.
    #[serde(default)]
    pub assignments: Vec<LenientAssignment>,
}

/// A [`FieldAssignment`] whose allowed-values payload is parsed
/// leniently: anything that fails to decode as a descriptor becomes
/// `None`.
#[derive(Debug, Clone, Deserialize)]
pub struct LenientAssignment {
    /// Id of the field this assignment belongs to.
    pub field_id: String,
    /// Source project scope id.
    pub project_scope_id: String,
    /// Source work-item-type scope id.
    pub type_scope_id: String,
    /// Whether the field is mandatory in this context.
    #[serde(default)]
    pub required: bool,
    /// Allowed values, degraded to `None` when malformed.
    #[serde(default, deserialize_with = "lenient_allowed_values")]
    pub allowed_values: Option<AllowedValuesDescriptor>,
}

impl From<LenientAssignment> for FieldAssignment {
    fn from(a: LenientAssignment) -> Self {
        Self {
            field_id: a.field_id,
            project_scope_id: a.project_scope_id,
            type_scope_id: a.type_scope_id,
            required: a.required,
            allowed_values: a.allowed_values,
        }
    }
}

fn lenient_allowed_values<'de, D>(
    deserializer: D,
) -> Result<Option<AllowedValuesDescriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    let Some(raw) = raw else { return Ok(None) };
    if raw.is_null() {
        return Ok(None);
    }
    match serde_json::from_value::<AllowedValuesDescriptor>(raw) {
        Ok(descriptor) => Ok(Some(descriptor)),
        Err(err) => {
            warn!(error = %err, "malformed allowed_values payload, treating as no data");
            Ok(None)
        },
    }
}

impl SourceSnapshot {
    /// Loads a source snapshot from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parses a source snapshot from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or its top level is not
    /// an object.
    pub fn from_json(content: &str) -> Result<Self, SnapshotError> {
        let value: serde_json::Value = serde_json::from_str(content)?;
        if !value.is_object() {
            return Err(SnapshotError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// The assignments converted to the strict model type.
    #[must_use]
    pub fn assignments(&self) -> Vec<FieldAssignment> {
        self.assignments.iter().cloned().map(Into::into).collect()
    }
}

/// Snapshot of the target system's existing fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetSnapshot {
    /// Existing target fields.
    #[serde(default)]
    pub fields: Vec<TargetField>,
}

impl TargetSnapshot {
    /// Loads a target snapshot from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parses a target snapshot from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or its top level is not
    /// an object.
    pub fn from_json(content: &str) -> Result<Self, SnapshotError> {
        let value: serde_json::Value = serde_json::from_str(content)?;
        if !value.is_object() {
            return Err(SnapshotError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Name index for matching: lowercased name to field. When two
    /// target fields collide on a case-folded name, the first one in
    /// snapshot order wins.
    #[must_use]
    pub fn by_name(&self) -> HashMap<String, &TargetField> {
        let mut index = HashMap::new();
        for field in &self.fields {
            index.entry(field.name.to_lowercase()).or_insert(field);
        }
        index
    }

    /// Field lookup by target id.
    #[must_use]
    pub fn by_id(&self) -> HashMap<i64, &TargetField> {
        self.fields.iter().map(|f| (f.id, f)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_source_snapshot() {
        let json = r#"{
            "fields": [
                {"id": "customfield_1", "name": "Severity", "type": "option",
                 "subtype": "vendor:select", "category": "source-native-custom"}
            ],
            "assignments": [
                {"field_id": "customfield_1", "project_scope_id": "P1",
                 "type_scope_id": "T1", "required": true,
                 "allowed_values": {"mode": "flat", "options": [{"label": "High"}]}}
            ]
        }"#;
        let snapshot = SourceSnapshot::from_json(json).unwrap();
        assert_eq!(snapshot.fields.len(), 1);
        let assignments = snapshot.assignments();
        assert!(assignments[0].required);
        assert!(assignments[0].allowed_values.is_some());
    }

    #[test]
    fn malformed_allowed_values_degrade_to_none() {
        let json = r#"{
            "fields": [],
            "assignments": [
                {"field_id": "f1", "project_scope_id": "P1", "type_scope_id": "T1",
                 "allowed_values": {"mode": "unheard-of", "stuff": 3}},
                {"field_id": "f2", "project_scope_id": "P1", "type_scope_id": "T1",
                 "allowed_values": null}
            ]
        }"#;
        let snapshot = SourceSnapshot::from_json(json).unwrap();
        let assignments = snapshot.assignments();
        assert_eq!(assignments.len(), 2);
        assert!(assignments[0].allowed_values.is_none());
        assert!(assignments[1].allowed_values.is_none());
    }

    #[test]
    fn target_name_index_is_case_insensitive() {
        let json = r#"{
            "fields": [
                {"id": 7, "name": "Severity", "format": "list"},
                {"id": 8, "name": "Found In", "format": "string"}
            ]
        }"#;
        let snapshot = TargetSnapshot::from_json(json).unwrap();
        let index = snapshot.by_name();
        assert_eq!(index["severity"].id, 7);
        assert_eq!(index["found in"].id, 8);
        assert_eq!(snapshot.by_id()[&7].name, "Severity");
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(SourceSnapshot::from_json("not json").is_err());
        assert!(matches!(
            SourceSnapshot::from_json("[]"),
            Err(SnapshotError::NotAnObject)
        ));
        assert!(matches!(
            TargetSnapshot::from_json("[]"),
            Err(SnapshotError::NotAnObject)
        ));
    }
}
