//! The reconciliation pass.
//!
//! A single-threaded, single-pass batch over the full source inventory.
//! Each field flows through classify, aggregate, cascade, and match, and
//! the resulting proposal is committed to the mapping store row by row;
//! no cross-row transaction spans the batch, so a crashed run is safe to
//! resume.
//!
//! # The hash gate
//!
//! Before recomputing anything for a row, the engine re-reads the
//! committed row and hashes its stored state. If the row carries an
//! automation hash and the recomputed hash differs, the row was edited
//! outside the engine since the last automated write: the engine logs a
//! preserved notice, bumps one counter, and touches nothing else on that
//! row. Otherwise it writes the fresh proposal together with the hash of
//! the new state, so an unmodified row hashes identically on the next
//! pass.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::aggregate::{AggregatedValues, aggregate};
use crate::cascade::{self, CascadingResolution};
use crate::classify::{Classification, classify};
use crate::config::CrossMappings;
use crate::fingerprint::{automation_hash, hash_of_mapping};
use crate::matcher::{
    ManualReason, MatchOutcome, ResolvedScope, derive_plan, match_field, render_notes,
    resolve_scope,
};
use crate::model::{
    AssociationAction, FieldAssignment, FieldMapping, MigrationStatus, ProposedState, RunSummary,
    SourceField, TargetField,
};
use crate::snapshot::TargetSnapshot;
use crate::store::{MappingStore, StoreError};

/// Errors that abort a whole reconciliation run. Per-field anomalies
/// never appear here; they are isolated into statuses and counters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The mapping store could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Materialized inputs for one reconciliation run.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileInputs<'a> {
    /// Source field inventory.
    pub fields: &'a [SourceField],
    /// Every (project-scope, type-scope) assignment.
    pub assignments: &'a [FieldAssignment],
    /// Snapshot of the target system's existing fields.
    pub target: &'a TargetSnapshot,
    /// Operator-maintained id translation tables.
    pub cross: &'a CrossMappings,
}

/// Runs one reconciliation pass and returns the outcome counters.
///
/// # Errors
///
/// Returns an error only when the mapping store itself fails; every
/// per-field anomaly is downgraded to a status and a counter.
pub fn reconcile(
    store: &MappingStore,
    inputs: &ReconcileInputs<'_>,
) -> Result<RunSummary, EngineError> {
    let mut pass = Pass {
        store,
        targets_by_name: inputs.target.by_name(),
        cross: inputs.cross,
        summary: RunSummary::default(),
    };

    let live_ids: BTreeSet<String> =
        inputs.fields.iter().map(|f| f.id.clone()).collect();
    pass.summary.purged = store.purge_missing(&live_ids)?;

    let mut by_field: HashMap<&str, Vec<&FieldAssignment>> = HashMap::new();
    for assignment in inputs.assignments {
        by_field
            .entry(assignment.field_id.as_str())
            .or_default()
            .push(assignment);
    }

    // Deterministic processing order keeps logs and row ids stable.
    let mut fields: Vec<&SourceField> = inputs.fields.iter().collect();
    fields.sort_by(|a, b| a.id.cmp(&b.id));

    for field in fields {
        let assignments = by_field.get(field.id.as_str()).map_or(&[][..], Vec::as_slice);
        pass.process_field(field, assignments)?;
    }

    info!(
        matched = pass.summary.matched,
        ready_for_creation = pass.summary.ready_for_creation,
        manual_review = pass.summary.manual_review,
        preserved = pass.summary.manual_overrides_preserved,
        ignored = pass.summary.ignored,
        skipped = pass.summary.skipped,
        unchanged = pass.summary.unchanged,
        purged = pass.summary.purged,
        "reconciliation pass complete"
    );
    Ok(pass.summary)
}

/// Re-derives the association plan from the persisted mappings plus a
/// fresh target snapshot. Needs no engine-internal memory.
///
/// # Errors
///
/// Returns an error if the mapping store cannot be read.
pub fn association_plan(
    store: &MappingStore,
    target: &TargetSnapshot,
) -> Result<Vec<AssociationAction>, EngineError> {
    let mappings = store.list()?;
    Ok(derive_plan(&mappings, &target.by_id()))
}

struct Pass<'a> {
    store: &'a MappingStore,
    targets_by_name: HashMap<String, &'a TargetField>,
    cross: &'a CrossMappings,
    summary: RunSummary,
}

/// Outcome of the manual-override gate for one row.
enum Gate {
    /// No committed row yet.
    Fresh,
    /// Committed row whose state still matches its automation hash.
    Clean(FieldMapping),
    /// Committed row edited outside the engine; untouchable this pass.
    Preserved(FieldMapping),
}

impl<'a> Pass<'a> {
    /// Read-before-write manual-override detection (the hash gate).
    fn gate(&mut self, source_field_id: &str) -> Result<Gate, EngineError> {
        let Some(committed) = self.store.fetch_committed(source_field_id)? else {
            return Ok(Gate::Fresh);
        };
        if let Some(stored_hash) = &committed.automation_hash {
            let current = hash_of_mapping(&committed);
            if current != *stored_hash {
                warn!(
                    source_field_id = %source_field_id,
                    status = committed.status.as_str(),
                    "manual edit detected, preserving row"
                );
                self.summary.manual_overrides_preserved += 1;
                return Ok(Gate::Preserved(committed));
            }
        }
        Ok(Gate::Clean(committed))
    }

    fn process_field(
        &mut self,
        field: &SourceField,
        assignments: &[&FieldAssignment],
    ) -> Result<(), EngineError> {
        let committed = match self.gate(&field.id)? {
            Gate::Preserved(_) => return Ok(()),
            Gate::Fresh => None,
            Gate::Clean(row) => Some(row),
        };

        // An ignored field with still-zero usage stays ignored without
        // recomputation.
        if assignments.is_empty() {
            if committed
                .as_ref()
                .is_some_and(|row| row.status == MigrationStatus::Ignored)
            {
                debug!(source_field_id = %field.id, "still unused, skipping");
                self.summary.skipped += 1;
                return Ok(());
            }
            self.write_ignored(field, committed, "no usage contexts found")?;
            return Ok(());
        }

        let scope = resolve_scope(assignments, self.cross);
        if scope.is_unresolvable() {
            self.write_ignored(
                field,
                committed,
                "no project or type scope could be resolved",
            )?;
            return Ok(());
        }

        let classification = classify(&field.field_type, field.subtype.as_deref());
        let aggregated = aggregate(assignments);

        let mut reasons = Vec::new();
        let mut info_notes = Vec::new();
        match (&classification.note, classification.requires_manual_review) {
            (Some(note), true) => reasons.push(ManualReason::Classifier(note.clone())),
            (Some(note), false) => info_notes.push(note.clone()),
            (None, true) => reasons.push(ManualReason::Classifier(
                "declared type needs manual review".to_string(),
            )),
            (None, false) => {},
        }
        if !scope.unmapped_projects.is_empty() {
            reasons.push(ManualReason::UnmappedProjects(scope.unmapped_projects.clone()));
        }
        if !scope.unmapped_types.is_empty() {
            reasons.push(ManualReason::UnmappedTypes(scope.unmapped_types.clone()));
        }
        if aggregated.mode_conflict {
            reasons.push(ManualReason::ModeConflict);
        }
        if field.name.trim().is_empty() {
            reasons.push(ManualReason::MissingName);
        }

        let mut proposed = base_proposal(field, &classification, assignments, &scope);

        let mut parent_link: Option<ParentLink> = None;
        if classification.is_cascading {
            match resolve_cascade(&aggregated) {
                Ok(resolution) => {
                    proposed.possible_values = resolution.child_possible_values.clone();
                    proposed.value_dependencies = resolution.value_dependencies.clone();
                    parent_link = Some(self.reconcile_parent(field, &resolution, &scope)?);
                },
                Err(detail) => reasons.push(ManualReason::UnresolvedCascade(detail)),
            }
        } else {
            self.drop_stale_parent(&field.id)?;
            if let Some(crate::model::AllowedValuesDescriptor::Flat { options }) =
                &aggregated.descriptor
            {
                proposed.possible_values = options.iter().map(|o| o.label.clone()).collect();
            }
        }

        if classification.requires_possible_values && proposed.possible_values.is_empty() {
            reasons.push(ManualReason::MissingOptions);
        }

        let mut outcome = match_field(proposed, &field.name, &reasons, &self.targets_by_name);

        // A matched cascading child cannot advance while its parent has
        // no resolved target field.
        if let Some(link) = &parent_link {
            if link.target_field_id.is_none()
                && matches!(
                    outcome.status,
                    MigrationStatus::MatchFound | MigrationStatus::ReadyForUpdate
                )
            {
                reasons.push(ManualReason::PendingParent);
                outcome.status = MigrationStatus::ManualInterventionRequired;
            }
        }

        let notes = join_notes(&info_notes, &reasons);
        self.commit_row(
            field,
            committed,
            outcome,
            parent_link.map(|link| link.mapping_id),
            notes,
        )
    }

    /// Reconciles the synthetic parent mapping of a cascading field.
    /// The parent row is persisted before the child so the child can
    /// hold its row id.
    fn reconcile_parent(
        &mut self,
        field: &SourceField,
        resolution: &CascadingResolution,
        scope: &ResolvedScope,
    ) -> Result<ParentLink, EngineError> {
        let parent_source_id = cascade::synthetic_parent_id(&field.id);
        let parent_name = format!("{} (parent)", field.name);

        let committed = match self.gate(&parent_source_id)? {
            Gate::Preserved(row) => {
                // The preserved row still anchors the child's reference.
                return Ok(ParentLink {
                    mapping_id: row.id.expect("committed row has an id"),
                    target_field_id: row.target_field_id,
                });
            },
            Gate::Fresh => None,
            Gate::Clean(row) => Some(row),
        };

        let proposed = ProposedState {
            name: Some(parent_name.clone()),
            format: Some("list".to_string()),
            required: false,
            filterable: true,
            for_all: false,
            multiple: false,
            possible_values: resolution.parent_possible_values.clone(),
            value_dependencies: Default::default(),
            default_value: None,
            tracker_ids: scope.tracker_ids.clone(),
            project_ids: scope.project_ids.clone(),
            role_ids: Default::default(),
        };

        let mut reasons = Vec::new();
        if !scope.unmapped_projects.is_empty() {
            reasons.push(ManualReason::UnmappedProjects(scope.unmapped_projects.clone()));
        }
        if !scope.unmapped_types.is_empty() {
            reasons.push(ManualReason::UnmappedTypes(scope.unmapped_types.clone()));
        }

        let outcome = match_field(proposed, &parent_name, &reasons, &self.targets_by_name);
        let target_field_id = outcome.target_field_id;
        let notes = join_notes(&[], &reasons);

        let mut row = committed.unwrap_or_else(|| {
            FieldMapping::new(parent_source_id.clone(), parent_name.clone())
        });
        row.source_field_name = parent_name;
        let mapping_id =
            self.finalize_and_write(&mut row, outcome, None, notes)?;

        Ok(ParentLink {
            mapping_id,
            target_field_id,
        })
    }

    /// Removes a lingering synthetic parent row once its base field no
    /// longer produces one (reclassified as non-cascading, or left
    /// without usable usage). Manually edited parents are preserved
    /// like any other overridden row.
    fn drop_stale_parent(&mut self, field_id: &str) -> Result<(), EngineError> {
        let parent_id = cascade::synthetic_parent_id(field_id);
        if let Gate::Clean(_) = self.gate(&parent_id)? {
            self.store.delete(&parent_id)?;
            self.summary.purged += 1;
            debug!(source_field_id = %parent_id, "removed stale cascading parent row");
        }
        Ok(())
    }

    /// Writes a terminal IGNORED row for a field with no usage or scope.
    fn write_ignored(
        &mut self,
        field: &SourceField,
        committed: Option<FieldMapping>,
        reason: &str,
    ) -> Result<(), EngineError> {
        self.drop_stale_parent(&field.id)?;
        let classification = classify(&field.field_type, field.subtype.as_deref());
        let proposed = ProposedState {
            name: Some(field.name.clone()),
            format: Some(classification.target_format),
            multiple: classification.is_multiple,
            ..ProposedState::default()
        };
        let outcome = MatchOutcome {
            status: MigrationStatus::Ignored,
            target_field_id: None,
            proposed,
        };
        let mut row =
            committed.unwrap_or_else(|| FieldMapping::new(field.id.clone(), field.name.clone()));
        row.source_field_name = field.name.clone();
        self.finalize_and_write(&mut row, outcome, None, Some(reason.to_string()))?;
        Ok(())
    }

    fn commit_row(
        &mut self,
        field: &SourceField,
        committed: Option<FieldMapping>,
        outcome: MatchOutcome,
        parent_mapping_id: Option<i64>,
        notes: Option<String>,
    ) -> Result<(), EngineError> {
        let mut row =
            committed.unwrap_or_else(|| FieldMapping::new(field.id.clone(), field.name.clone()));
        row.source_field_name = field.name.clone();
        self.finalize_and_write(&mut row, outcome, parent_mapping_id, notes)?;
        Ok(())
    }

    /// Applies an outcome to a row, decides the final status, and writes
    /// it unless the new state hashes identically to the committed one.
    /// Returns the row id.
    fn finalize_and_write(
        &mut self,
        row: &mut FieldMapping,
        outcome: MatchOutcome,
        parent_mapping_id: Option<i64>,
        notes: Option<String>,
    ) -> Result<i64, EngineError> {
        let previous_status = row.status;
        let previous_hash = row.automation_hash.clone();

        let status = next_status(previous_status, outcome.status);
        let new_hash = automation_hash(
            outcome.target_field_id,
            status,
            &outcome.proposed,
            parent_mapping_id,
        );

        if previous_hash.as_deref() == Some(new_hash.as_str()) && previous_status == status {
            self.summary.unchanged += 1;
            return Ok(row.id.expect("committed row has an id"));
        }

        row.target_field_id = outcome.target_field_id;
        row.parent_mapping_id = parent_mapping_id;
        row.proposed = outcome.proposed;
        row.notes = notes;
        row.status = status;
        row.automation_hash = Some(new_hash);
        row.updated_at = chrono::Utc::now();

        let id = self.store.upsert(row)?;
        row.id = Some(id);
        self.bump(status);
        Ok(id)
    }

    fn bump(&mut self, status: MigrationStatus) {
        match status {
            MigrationStatus::MatchFound
            | MigrationStatus::ReadyForUpdate
            | MigrationStatus::CreationSuccess => self.summary.matched += 1,
            MigrationStatus::ReadyForCreation => self.summary.ready_for_creation += 1,
            MigrationStatus::ManualInterventionRequired => self.summary.manual_review += 1,
            MigrationStatus::Ignored => self.summary.ignored += 1,
            MigrationStatus::PendingAnalysis | MigrationStatus::CreationFailed => {
                self.summary.skipped += 1;
            },
        }
    }
}

struct ParentLink {
    mapping_id: i64,
    target_field_id: Option<i64>,
}

/// Re-enterable creation outcomes: a successful creation stays
/// successful while the match is clean, regresses on association drift,
/// and a failed creation is simply retried with the fresh decision.
const fn next_status(committed: MigrationStatus, computed: MigrationStatus) -> MigrationStatus {
    match (committed, computed) {
        (MigrationStatus::CreationSuccess, MigrationStatus::MatchFound) => {
            MigrationStatus::CreationSuccess
        },
        _ => computed,
    }
}

fn resolve_cascade(aggregated: &AggregatedValues) -> Result<CascadingResolution, String> {
    match &aggregated.descriptor {
        Some(descriptor) => cascade::resolve(descriptor).map_err(|e| e.to_string()),
        None => Err("cascading field has no allowed-values data".to_string()),
    }
}

fn base_proposal(
    field: &SourceField,
    classification: &Classification,
    assignments: &[&FieldAssignment],
    scope: &ResolvedScope,
) -> ProposedState {
    ProposedState {
        name: if field.name.trim().is_empty() {
            None
        } else {
            Some(field.name.clone())
        },
        format: Some(classification.target_format.clone()),
        required: assignments.iter().any(|a| a.required),
        filterable: true,
        for_all: false,
        multiple: classification.is_multiple,
        possible_values: Vec::new(),
        value_dependencies: Default::default(),
        default_value: None,
        tracker_ids: scope.tracker_ids.clone(),
        project_ids: scope.project_ids.clone(),
        role_ids: Default::default(),
    }
}

fn join_notes(info_notes: &[String], reasons: &[ManualReason]) -> Option<String> {
    let mut lines: Vec<String> = info_notes.to_vec();
    if let Some(rendered) = render_notes(reasons) {
        lines.push(rendered);
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}
