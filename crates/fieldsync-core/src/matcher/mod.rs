//! Matching against the target snapshot and association planning.
//!
//! A proposal is matched by case-insensitive exact name, proposed name
//! first, then the unmodified source name. Once a link exists the target
//! system is authoritative: its format, flags, possible values, and
//! default become the proposal baseline, and the engine only ever adds
//! scope associations on top. The association plan is re-derivable at
//! any time from persisted mappings plus a fresh target snapshot; the
//! engine keeps no internal memory of it.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::config::CrossMappings;
use crate::model::{
    AssociationAction, FieldAssignment, FieldMapping, MigrationStatus, ProposedState, TargetField,
};

/// A reason a mapping needs human attention before it can proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualReason {
    /// The source field has no usable name.
    MissingName,
    /// Source project scopes with no target project mapping.
    UnmappedProjects(Vec<String>),
    /// Source type scopes with no target tracker mapping.
    UnmappedTypes(Vec<String>),
    /// The classifier flagged the declared type for review.
    Classifier(String),
    /// The field requires possible values but none were found.
    MissingOptions,
    /// Assignments disagreed on flat vs cascading mode.
    ModeConflict,
    /// The cascading descriptor could not be resolved.
    UnresolvedCascade(String),
    /// The cascading parent has no resolved target field yet.
    PendingParent,
}

impl fmt::Display for ManualReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingName => write!(f, "source field has no usable name"),
            Self::UnmappedProjects(ids) => {
                write!(f, "unmapped source project scope(s): {}", ids.join(", "))
            },
            Self::UnmappedTypes(ids) => {
                write!(f, "unmapped source type scope(s): {}", ids.join(", "))
            },
            Self::Classifier(note) => write!(f, "{note}"),
            Self::MissingOptions => {
                write!(f, "field requires possible values but none were found")
            },
            Self::ModeConflict => write!(
                f,
                "assignments disagree on flat vs cascading mode; conflicting contributions \
                 were discarded"
            ),
            Self::UnresolvedCascade(detail) => write!(f, "{detail}"),
            Self::PendingParent => {
                write!(f, "cascading parent has no resolved target field yet")
            },
        }
    }
}

/// Renders reasons as the mapping's notes text, one per line.
#[must_use]
pub fn render_notes(reasons: &[ManualReason]) -> Option<String> {
    if reasons.is_empty() {
        return None;
    }
    Some(
        reasons
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// Target scope derived from a field's assignments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedScope {
    /// Mapped target project ids.
    pub project_ids: BTreeSet<i64>,
    /// Mapped target tracker ids.
    pub tracker_ids: BTreeSet<i64>,
    /// Source project scopes with no mapping.
    pub unmapped_projects: Vec<String>,
    /// Source type scopes with no mapping.
    pub unmapped_types: Vec<String>,
}

impl ResolvedScope {
    /// True when not a single scope id could be translated.
    #[must_use]
    pub fn is_unresolvable(&self) -> bool {
        self.project_ids.is_empty() && self.tracker_ids.is_empty()
    }
}

/// Translates the (project, type) scopes of every assignment through
/// the cross-mapping tables.
#[must_use]
pub fn resolve_scope(assignments: &[&FieldAssignment], mappings: &CrossMappings) -> ResolvedScope {
    let mut scope = ResolvedScope::default();
    let mut missing_projects = BTreeSet::new();
    let mut missing_types = BTreeSet::new();

    for assignment in assignments {
        match mappings.target_project(&assignment.project_scope_id) {
            Some(id) => {
                scope.project_ids.insert(id);
            },
            None => {
                missing_projects.insert(assignment.project_scope_id.clone());
            },
        }
        match mappings.target_tracker(&assignment.type_scope_id) {
            Some(id) => {
                scope.tracker_ids.insert(id);
            },
            None => {
                missing_types.insert(assignment.type_scope_id.clone());
            },
        }
    }

    scope.unmapped_projects = missing_projects.into_iter().collect();
    scope.unmapped_types = missing_types.into_iter().collect();
    scope
}

/// Outcome of matching one proposal against the target snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Decided status.
    pub status: MigrationStatus,
    /// Matched target field id, when one was found.
    pub target_field_id: Option<i64>,
    /// The proposal, rebased on the target field when matched.
    pub proposed: ProposedState,
}

/// Matches a proposal against the target snapshot and decides status.
///
/// `targets_by_name` must be keyed by lowercased name (see
/// [`crate::snapshot::TargetSnapshot::by_name`]). `reasons` carries
/// every manual-review reason raised upstream; a non-empty list forces
/// `MANUAL_INTERVENTION_REQUIRED` when no target field matches.
#[must_use]
pub fn match_field(
    mut proposed: ProposedState,
    source_name: &str,
    reasons: &[ManualReason],
    targets_by_name: &HashMap<String, &TargetField>,
) -> MatchOutcome {
    let matched = proposed
        .name
        .as_deref()
        .and_then(|name| targets_by_name.get(name.to_lowercase().as_str()))
        .or_else(|| targets_by_name.get(source_name.to_lowercase().as_str()))
        .copied();

    if let Some(target) = matched {
        // The target system is authoritative once a link exists.
        proposed.name = Some(target.name.clone());
        proposed.format = Some(target.format.clone());
        proposed.required = target.is_required;
        proposed.filterable = target.is_filterable;
        proposed.for_all = target.is_for_all;
        proposed.multiple = target.multiple;
        proposed.possible_values = target.possible_values.clone();
        proposed.default_value = target.default_value.clone();

        let desired_projects: BTreeSet<i64> = target
            .project_ids
            .union(&proposed.project_ids)
            .copied()
            .collect();
        let desired_trackers: BTreeSet<i64> = target
            .tracker_ids
            .union(&proposed.tracker_ids)
            .copied()
            .collect();
        let needs_update =
            desired_projects != target.project_ids || desired_trackers != target.tracker_ids;
        proposed.project_ids = desired_projects;
        proposed.tracker_ids = desired_trackers;

        let status = if needs_update {
            MigrationStatus::ReadyForUpdate
        } else {
            MigrationStatus::MatchFound
        };
        return MatchOutcome {
            status,
            target_field_id: Some(target.id),
            proposed,
        };
    }

    if reasons.is_empty() {
        MatchOutcome {
            status: MigrationStatus::ReadyForCreation,
            target_field_id: None,
            proposed,
        }
    } else {
        MatchOutcome {
            status: MigrationStatus::ManualInterventionRequired,
            target_field_id: None,
            proposed,
        }
    }
}

/// Derives the association plan from persisted mappings plus a fresh
/// target snapshot.
///
/// One action per mapping that is linked to a target field and whose
/// desired scope is not yet fully present on the target side. Purely a
/// function of its inputs; nothing engine-internal is consulted.
#[must_use]
pub fn derive_plan(
    mappings: &[FieldMapping],
    targets_by_id: &HashMap<i64, &TargetField>,
) -> Vec<AssociationAction> {
    let by_row_id: HashMap<i64, &FieldMapping> = mappings
        .iter()
        .filter_map(|m| m.id.map(|id| (id, m)))
        .collect();

    let mut plan = Vec::new();
    for mapping in mappings {
        let (Some(row_id), Some(target_field_id)) = (mapping.id, mapping.target_field_id) else {
            continue;
        };
        let Some(target) = targets_by_id.get(&target_field_id) else {
            // The target field vanished since the snapshot; the next
            // reconcile pass will re-decide this mapping.
            continue;
        };

        let missing_project_ids: BTreeSet<i64> = mapping
            .proposed
            .project_ids
            .difference(&target.project_ids)
            .copied()
            .collect();
        let missing_tracker_ids: BTreeSet<i64> = mapping
            .proposed
            .tracker_ids
            .difference(&target.tracker_ids)
            .copied()
            .collect();
        if missing_project_ids.is_empty() && missing_tracker_ids.is_empty() {
            continue;
        }

        let parent_target_field_id = mapping
            .parent_mapping_id
            .and_then(|parent_id| by_row_id.get(&parent_id))
            .and_then(|parent| parent.target_field_id);

        plan.push(AssociationAction {
            mapping_id: row_id,
            source_field_id: mapping.source_field_id.clone(),
            target_field_id,
            parent_target_field_id,
            target_project_ids: mapping.proposed.project_ids.clone(),
            target_tracker_ids: mapping.proposed.tracker_ids.clone(),
            missing_project_ids,
            missing_tracker_ids,
        });
    }
    plan
}

#[cfg(test)]
mod tests;
