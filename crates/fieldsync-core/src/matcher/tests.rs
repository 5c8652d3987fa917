use chrono::Utc;

use super::*;
use crate::model::FieldOption;

fn target(id: i64, name: &str) -> TargetField {
    TargetField {
        id,
        name: name.to_string(),
        format: "list".to_string(),
        is_required: false,
        is_filterable: true,
        is_for_all: false,
        multiple: false,
        possible_values: vec!["High".to_string(), "Low".to_string()],
        default_value: Some("Low".to_string()),
        tracker_ids: [1].into_iter().collect(),
        project_ids: [1].into_iter().collect(),
    }
}

fn index(targets: &[TargetField]) -> HashMap<String, &TargetField> {
    let mut map = HashMap::new();
    for t in targets {
        map.insert(t.name.to_lowercase(), t);
    }
    map
}

fn assignment(project: &str, ty: &str) -> FieldAssignment {
    FieldAssignment {
        field_id: "f1".to_string(),
        project_scope_id: project.to_string(),
        type_scope_id: ty.to_string(),
        required: false,
        allowed_values: Some(crate::model::AllowedValuesDescriptor::Flat {
            options: vec![FieldOption::label_only("High")],
        }),
    }
}

fn cross() -> CrossMappings {
    CrossMappings::from_toml(
        r#"
        [projects]
        "P1" = 1
        "P2" = 2

        [trackers]
        "bug" = 1
        "task" = 2
    "#,
    )
    .unwrap()
}

#[test]
fn scope_resolution_unions_and_reports_unmapped() {
    let a = assignment("P1", "bug");
    let b = assignment("P2", "mystery");
    let scope = resolve_scope(&[&a, &b], &cross());
    assert_eq!(scope.project_ids, [1, 2].into_iter().collect());
    assert_eq!(scope.tracker_ids, [1].into_iter().collect());
    assert_eq!(scope.unmapped_types, ["mystery"]);
    assert!(scope.unmapped_projects.is_empty());
    assert!(!scope.is_unresolvable());
}

#[test]
fn fully_unmapped_scope_is_unresolvable() {
    let a = assignment("PX", "mystery");
    let scope = resolve_scope(&[&a], &CrossMappings::default());
    assert!(scope.is_unresolvable());
}

#[test]
fn match_by_proposed_name_inherits_target_baseline() {
    let targets = vec![target(7, "Severity")];
    let proposed = ProposedState {
        name: Some("severity".to_string()),
        format: Some("string".to_string()),
        possible_values: vec!["Critical".to_string()],
        project_ids: [1].into_iter().collect(),
        tracker_ids: [1].into_iter().collect(),
        ..ProposedState::default()
    };

    let outcome = match_field(proposed, "Old Name", &[], &index(&targets));
    assert_eq!(outcome.status, MigrationStatus::MatchFound);
    assert_eq!(outcome.target_field_id, Some(7));
    // Target is authoritative once linked.
    assert_eq!(outcome.proposed.format.as_deref(), Some("list"));
    assert_eq!(outcome.proposed.possible_values, ["High", "Low"]);
    assert_eq!(outcome.proposed.default_value.as_deref(), Some("Low"));
    assert_eq!(outcome.proposed.name.as_deref(), Some("Severity"));
}

#[test]
fn match_falls_back_to_source_name() {
    let targets = vec![target(7, "Severity")];
    let proposed = ProposedState {
        name: None,
        ..ProposedState::default()
    };
    let outcome = match_field(proposed, "SEVERITY", &[], &index(&targets));
    assert_eq!(outcome.target_field_id, Some(7));
}

#[test]
fn scope_superset_forces_ready_for_update() {
    let targets = vec![target(7, "Severity")];
    let proposed = ProposedState {
        name: Some("Severity".to_string()),
        project_ids: [1, 3].into_iter().collect(),
        tracker_ids: [1].into_iter().collect(),
        ..ProposedState::default()
    };
    let outcome = match_field(proposed, "Severity", &[], &index(&targets));
    assert_eq!(outcome.status, MigrationStatus::ReadyForUpdate);
    // Desired scope is the union of both sides.
    assert_eq!(outcome.proposed.project_ids, [1, 3].into_iter().collect());
}

#[test]
fn no_match_without_reasons_is_ready_for_creation() {
    let proposed = ProposedState {
        name: Some("Brand New".to_string()),
        ..ProposedState::default()
    };
    let outcome = match_field(proposed, "Brand New", &[], &HashMap::new());
    assert_eq!(outcome.status, MigrationStatus::ReadyForCreation);
    assert_eq!(outcome.target_field_id, None);
}

#[test]
fn no_match_with_reasons_needs_manual_intervention() {
    let proposed = ProposedState::default();
    let reasons = vec![ManualReason::MissingOptions];
    let outcome = match_field(proposed, "New", &reasons, &HashMap::new());
    assert_eq!(outcome.status, MigrationStatus::ManualInterventionRequired);
    assert_eq!(outcome.target_field_id, None);
}

#[test]
fn notes_render_one_reason_per_line() {
    let notes = render_notes(&[
        ManualReason::MissingOptions,
        ManualReason::UnmappedTypes(vec!["epic".to_string()]),
    ])
    .unwrap();
    assert_eq!(notes.lines().count(), 2);
    assert!(notes.contains("epic"));
    assert!(render_notes(&[]).is_none());
}

#[test]
fn plan_lists_only_missing_associations() {
    let targets = vec![target(7, "Severity"), target(8, "Component")];
    let by_id: HashMap<i64, &TargetField> = targets.iter().map(|t| (t.id, t)).collect();

    let now = Utc::now();
    let make = |row_id: i64, source: &str, target_id: Option<i64>, projects: &[i64]| FieldMapping {
        id: Some(row_id),
        source_field_id: source.to_string(),
        source_field_name: source.to_string(),
        target_field_id: target_id,
        parent_mapping_id: None,
        proposed: ProposedState {
            project_ids: projects.iter().copied().collect(),
            tracker_ids: [1].into_iter().collect(),
            ..ProposedState::default()
        },
        notes: None,
        status: MigrationStatus::ReadyForUpdate,
        automation_hash: None,
        created_at: now,
        updated_at: now,
    };

    let mappings = vec![
        // Missing project 3 on the target side.
        make(1, "f1", Some(7), &[1, 3]),
        // Fully associated already.
        make(2, "f2", Some(8), &[1]),
        // Not linked to any target field.
        make(3, "f3", None, &[1, 2]),
    ];

    let plan = derive_plan(&mappings, &by_id);
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].mapping_id, 1);
    assert_eq!(plan[0].target_field_id, 7);
    assert_eq!(plan[0].missing_project_ids, [3].into_iter().collect());
    assert!(plan[0].missing_tracker_ids.is_empty());
}

#[test]
fn plan_resolves_parent_target_id_through_row_reference() {
    let targets = vec![target(7, "Child"), target(9, "Child (parent)")];
    let by_id: HashMap<i64, &TargetField> = targets.iter().map(|t| (t.id, t)).collect();
    let now = Utc::now();

    let parent = FieldMapping {
        id: Some(10),
        source_field_id: "f1::parent".to_string(),
        source_field_name: "Child (parent)".to_string(),
        target_field_id: Some(9),
        parent_mapping_id: None,
        proposed: ProposedState::default(),
        notes: None,
        status: MigrationStatus::MatchFound,
        automation_hash: None,
        created_at: now,
        updated_at: now,
    };
    let child = FieldMapping {
        id: Some(11),
        source_field_id: "f1".to_string(),
        source_field_name: "Child".to_string(),
        target_field_id: Some(7),
        parent_mapping_id: Some(10),
        proposed: ProposedState {
            project_ids: [1, 5].into_iter().collect(),
            ..ProposedState::default()
        },
        notes: None,
        status: MigrationStatus::ReadyForUpdate,
        automation_hash: None,
        created_at: now,
        updated_at: now,
    };

    let plan = derive_plan(&[parent, child], &by_id);
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].parent_target_field_id, Some(9));
}
