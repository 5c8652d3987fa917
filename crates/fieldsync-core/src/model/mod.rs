//! Domain model for field reconciliation.
//!
//! The types here are the contract between the extraction layer (which
//! materializes snapshots of both platforms), the reconciliation engine,
//! and the push layer (which consumes the association plan). Everything
//! is plain serde data: validation and normalization happen at the
//! boundary, never inside core logic.
//!
//! # Mapping lifecycle
//!
//! ```text
//! PendingAnalysis --> Ignored
//!                 --> ManualInterventionRequired
//!                 --> ReadyForCreation -----> CreationSuccess
//!                 --> MatchFound                |       ^
//!                 --> ReadyForUpdate <----------+       |
//!                          |          (association drift)
//!                          v
//!                    CreationFailed (retried on the next run)
//! ```

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a source field is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldCategory {
    /// Built-in field of the source platform.
    System,
    /// Custom field defined natively in the source platform.
    SourceNativeCustom,
    /// Custom field contributed by a third-party app.
    AppCustom,
}

/// A field defined in the source system.
///
/// Immutable once extracted; a re-sync replaces the whole inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceField {
    /// Stable identifier in the source system.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Declared coarse type (e.g. `string`, `option`, `array`).
    #[serde(rename = "type")]
    pub field_type: String,
    /// Declared subtype, when the platform exposes one.
    #[serde(default)]
    pub subtype: Option<String>,
    /// Field origin.
    pub category: FieldCategory,
}

/// One allowed option of a select-style field.
///
/// The id is the source platform's stable option id when known. Options
/// harvested from usage data carry only a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOption {
    /// Stable option id, if the source exposed one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Option label. Case-sensitive, trimmed.
    pub label: String,
}

impl FieldOption {
    /// Convenience constructor for a label-only option.
    #[must_use]
    pub fn label_only(label: impl Into<String>) -> Self {
        Self {
            id: None,
            label: label.into(),
        }
    }
}

/// The allowed-values shape a field exposes in one context, or after
/// aggregation across all contexts.
///
/// Invariant for the `Cascading` variant (enforced by the cascade
/// resolver): every parent label appears as a key of `children` and every
/// key of `children` appears in `parents`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AllowedValuesDescriptor {
    /// A single-level option list.
    Flat {
        /// Ordered option set, deduplicated by label.
        options: Vec<FieldOption>,
    },
    /// A two-level parent/children option structure.
    Cascading {
        /// Parent option list.
        parents: Vec<FieldOption>,
        /// Child options per parent label.
        children: BTreeMap<String, Vec<FieldOption>>,
    },
}

impl AllowedValuesDescriptor {
    /// True when the descriptor carries no options at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Flat { options } => options.is_empty(),
            Self::Cascading { parents, children } => {
                parents.is_empty() && children.values().all(Vec::is_empty)
            },
        }
    }

    /// Short mode name used in notes and logs.
    #[must_use]
    pub const fn mode(&self) -> &'static str {
        match self {
            Self::Flat { .. } => "flat",
            Self::Cascading { .. } => "cascading",
        }
    }
}

/// One (project-scope, type-scope) context in which a source field is
/// used. Many assignments map to one [`SourceField`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldAssignment {
    /// Id of the field this assignment belongs to.
    pub field_id: String,
    /// Source project scope id.
    pub project_scope_id: String,
    /// Source work-item-type scope id.
    pub type_scope_id: String,
    /// Whether the field is mandatory in this context.
    #[serde(default)]
    pub required: bool,
    /// Allowed values local to this context. Malformed payloads are
    /// degraded to `None` at the snapshot boundary.
    #[serde(default)]
    pub allowed_values: Option<AllowedValuesDescriptor>,
}

/// Reconciliation status of a [`FieldMapping`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationStatus {
    /// Freshly discovered, not yet analyzed.
    PendingAnalysis,
    /// No real-world usage or no resolvable scope; terminal until the
    /// field gains usage or scope.
    Ignored,
    /// A human must look at this mapping before it can proceed.
    ManualInterventionRequired,
    /// Proposal is complete and no target field matched; safe to create.
    ReadyForCreation,
    /// An existing target field matched and already carries every
    /// required scope association.
    MatchFound,
    /// An existing target field matched but is missing scope
    /// associations.
    ReadyForUpdate,
    /// The push layer created the field successfully.
    CreationSuccess,
    /// The push layer failed to create the field; retried next run.
    CreationFailed,
}

impl MigrationStatus {
    /// Stable storage token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingAnalysis => "PENDING_ANALYSIS",
            Self::Ignored => "IGNORED",
            Self::ManualInterventionRequired => "MANUAL_INTERVENTION_REQUIRED",
            Self::ReadyForCreation => "READY_FOR_CREATION",
            Self::MatchFound => "MATCH_FOUND",
            Self::ReadyForUpdate => "READY_FOR_UPDATE",
            Self::CreationSuccess => "CREATION_SUCCESS",
            Self::CreationFailed => "CREATION_FAILED",
        }
    }

    /// Parses a storage token. Returns `None` for unknown tokens so the
    /// store can degrade a corrupt column instead of failing the batch.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "PENDING_ANALYSIS" => Self::PendingAnalysis,
            "IGNORED" => Self::Ignored,
            "MANUAL_INTERVENTION_REQUIRED" => Self::ManualInterventionRequired,
            "READY_FOR_CREATION" => Self::ReadyForCreation,
            "MATCH_FOUND" => Self::MatchFound,
            "READY_FOR_UPDATE" => Self::ReadyForUpdate,
            "CREATION_SUCCESS" => Self::CreationSuccess,
            "CREATION_FAILED" => Self::CreationFailed,
            _ => return None,
        })
    }
}

/// The automatically managed part of a mapping: what the engine proposes
/// to create or update in the target system.
///
/// Notes deliberately live on [`FieldMapping`], not here, so that
/// annotating a row never perturbs its automation hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedState {
    /// Proposed target field name.
    #[serde(default)]
    pub name: Option<String>,
    /// Proposed target field format.
    #[serde(default)]
    pub format: Option<String>,
    /// Field is mandatory.
    #[serde(default)]
    pub required: bool,
    /// Field is usable as a filter.
    #[serde(default)]
    pub filterable: bool,
    /// Field applies to every project.
    #[serde(default)]
    pub for_all: bool,
    /// Field accepts multiple values.
    #[serde(default)]
    pub multiple: bool,
    /// Canonical possible-values list (lexicographic).
    #[serde(default)]
    pub possible_values: Vec<String>,
    /// Parent label to child labels, for cascading children.
    #[serde(default)]
    pub value_dependencies: BTreeMap<String, Vec<String>>,
    /// Default value, inherited from a matched target field.
    #[serde(default)]
    pub default_value: Option<String>,
    /// Target tracker ids the field should be linked to.
    #[serde(default)]
    pub tracker_ids: BTreeSet<i64>,
    /// Target project ids the field should be linked to.
    #[serde(default)]
    pub project_ids: BTreeSet<i64>,
    /// Target role ids granted visibility.
    #[serde(default)]
    pub role_ids: BTreeSet<i64>,
}

/// The persisted reconciliation record, one per source field plus one
/// synthetic row per cascading parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    /// Row id, assigned by the store on first upsert.
    pub id: Option<i64>,
    /// Source field id, or the reserved synthetic parent id.
    pub source_field_id: String,
    /// Source field display name at extraction time.
    pub source_field_name: String,
    /// Resolved target field id; null until matched or created.
    pub target_field_id: Option<i64>,
    /// Row id of the synthetic parent mapping, for cascading children.
    pub parent_mapping_id: Option<i64>,
    /// The engine-managed proposal.
    pub proposed: ProposedState,
    /// Free-text annotations. Excluded from the automation hash.
    pub notes: Option<String>,
    /// Current lifecycle status.
    pub status: MigrationStatus,
    /// Hash of the state the engine last wrote; null before the first
    /// automated write.
    pub automation_hash: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl FieldMapping {
    /// A fresh, unanalyzed mapping for a newly discovered field.
    #[must_use]
    pub fn new(source_field_id: impl Into<String>, source_field_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            source_field_id: source_field_id.into(),
            source_field_name: source_field_name.into(),
            target_field_id: None,
            parent_mapping_id: None,
            proposed: ProposedState::default(),
            notes: None,
            status: MigrationStatus::PendingAnalysis,
            automation_hash: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Snapshot of an existing field in the target system. Read-only input
/// to the matcher; refreshed by the extraction layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetField {
    /// Target field id.
    pub id: i64,
    /// Target field name.
    pub name: String,
    /// Target field format token.
    pub format: String,
    /// Field is mandatory.
    #[serde(default)]
    pub is_required: bool,
    /// Field is usable as a filter.
    #[serde(default)]
    pub is_filterable: bool,
    /// Field applies to every project.
    #[serde(default)]
    pub is_for_all: bool,
    /// Field accepts multiple values.
    #[serde(default)]
    pub multiple: bool,
    /// Possible values currently configured.
    #[serde(default)]
    pub possible_values: Vec<String>,
    /// Configured default value.
    #[serde(default)]
    pub default_value: Option<String>,
    /// Tracker ids the field is currently linked to.
    #[serde(default)]
    pub tracker_ids: BTreeSet<i64>,
    /// Project ids the field is currently linked to.
    #[serde(default)]
    pub project_ids: BTreeSet<i64>,
}

/// One pending association action in the plan consumed by the push
/// layer: the scope ids a matched field still needs on the target side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationAction {
    /// Mapping row id.
    pub mapping_id: i64,
    /// Source field id, for operator-facing output.
    pub source_field_id: String,
    /// The matched or created target field.
    pub target_field_id: i64,
    /// Target id of the resolved cascading parent, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_target_field_id: Option<i64>,
    /// Full desired project scope.
    pub target_project_ids: BTreeSet<i64>,
    /// Full desired tracker scope.
    pub target_tracker_ids: BTreeSet<i64>,
    /// Desired project ids absent from the target snapshot.
    pub missing_project_ids: BTreeSet<i64>,
    /// Desired tracker ids absent from the target snapshot.
    pub missing_tracker_ids: BTreeSet<i64>,
}

/// Per-run outcome counters. The engine exposes no formatting; a CLI or
/// dashboard layer renders these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Mappings that matched an existing target field.
    pub matched: u64,
    /// Mappings ready to be created in the target system.
    pub ready_for_creation: u64,
    /// Mappings requiring human review.
    pub manual_review: u64,
    /// Rows left untouched because a manual edit was detected.
    pub manual_overrides_preserved: u64,
    /// Fields ignored for lack of usage or scope.
    pub ignored: u64,
    /// Rows skipped without recomputation (already terminal).
    pub skipped: u64,
    /// Rows whose recomputed state hashed identically to the stored one.
    pub unchanged: u64,
    /// Mappings purged because their source field disappeared.
    pub purged: u64,
}

impl RunSummary {
    /// Total rows the run looked at, purges excluded.
    #[must_use]
    pub const fn evaluated(&self) -> u64 {
        self.matched
            + self.ready_for_creation
            + self.manual_review
            + self.manual_overrides_preserved
            + self.ignored
            + self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_tokens_round_trip() {
        let all = [
            MigrationStatus::PendingAnalysis,
            MigrationStatus::Ignored,
            MigrationStatus::ManualInterventionRequired,
            MigrationStatus::ReadyForCreation,
            MigrationStatus::MatchFound,
            MigrationStatus::ReadyForUpdate,
            MigrationStatus::CreationSuccess,
            MigrationStatus::CreationFailed,
        ];
        for status in all {
            assert_eq!(MigrationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MigrationStatus::parse("NOT_A_STATUS"), None);
    }

    #[test]
    fn descriptor_emptiness() {
        let flat = AllowedValuesDescriptor::Flat { options: vec![] };
        assert!(flat.is_empty());

        let cascading = AllowedValuesDescriptor::Cascading {
            parents: vec![FieldOption::label_only("A")],
            children: BTreeMap::new(),
        };
        assert!(!cascading.is_empty());
        assert_eq!(cascading.mode(), "cascading");
    }

    #[test]
    fn descriptor_serde_tagging() {
        let flat = AllowedValuesDescriptor::Flat {
            options: vec![FieldOption::label_only("x")],
        };
        let json = serde_json::to_value(&flat).unwrap();
        assert_eq!(json["mode"], "flat");

        let parsed: AllowedValuesDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, flat);
    }

    #[test]
    fn new_mapping_starts_pending() {
        let mapping = FieldMapping::new("customfield_10001", "Severity");
        assert_eq!(mapping.status, MigrationStatus::PendingAnalysis);
        assert!(mapping.automation_hash.is_none());
        assert!(mapping.target_field_id.is_none());
    }
}
