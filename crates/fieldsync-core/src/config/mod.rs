//! Cross-mapping configuration.
//!
//! The engine needs two id translation tables maintained by operators:
//! source project id to target project id, and source work-item-type id
//! to target tracker id. They live in a TOML file next to the mapping
//! store.
//!
//! ```toml
//! [projects]
//! "10000" = 1
//! "10001" = 2
//!
//! [trackers]
//! "bug" = 1
//! "task" = 2
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors while loading cross-mapping configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML is invalid.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config parsed but is semantically invalid.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Source-to-target id translation tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossMappings {
    /// Source project scope id to target project id.
    #[serde(default)]
    pub projects: BTreeMap<String, i64>,

    /// Source type scope id to target tracker id.
    #[serde(default)]
    pub trackers: BTreeMap<String, i64>,
}

impl CrossMappings {
    /// Loads cross-mappings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if any
    /// target id is non-positive.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses cross-mappings from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or any target id is
    /// non-positive.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mappings: Self = toml::from_str(content)?;
        mappings.validate()?;
        Ok(mappings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (source, target) in self.projects.iter().chain(self.trackers.iter()) {
            if *target <= 0 {
                return Err(ConfigError::Validation(format!(
                    "mapping for '{source}' has non-positive target id {target}"
                )));
            }
        }
        Ok(())
    }

    /// Target project id for a source project scope id.
    #[must_use]
    pub fn target_project(&self, source_project_id: &str) -> Option<i64> {
        self.projects.get(source_project_id).copied()
    }

    /// Target tracker id for a source type scope id.
    #[must_use]
    pub fn target_tracker(&self, source_type_id: &str) -> Option<i64> {
        self.trackers.get(source_type_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tables() {
        let toml = r#"
            [projects]
            "10000" = 1
            "10001" = 2

            [trackers]
            "bug" = 1
        "#;
        let mappings = CrossMappings::from_toml(toml).unwrap();
        assert_eq!(mappings.target_project("10000"), Some(1));
        assert_eq!(mappings.target_project("99999"), None);
        assert_eq!(mappings.target_tracker("bug"), Some(1));
    }

    #[test]
    fn empty_config_is_valid() {
        let mappings = CrossMappings::from_toml("").unwrap();
        assert!(mappings.projects.is_empty());
        assert!(mappings.trackers.is_empty());
    }

    #[test]
    fn rejects_non_positive_target_ids() {
        let toml = r#"
            [projects]
            "10000" = 0
        "#;
        let err = CrossMappings::from_toml(toml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_invalid_toml() {
        assert!(matches!(
            CrossMappings::from_toml("projects = 3"),
            Err(ConfigError::Parse(_))
        ));
    }
}
