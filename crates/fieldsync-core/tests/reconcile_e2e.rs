//! End-to-end reconciliation: snapshot files on disk, an on-disk mapping
//! store, two engine passes, and a derived association plan.

use std::collections::BTreeSet;
use std::fs;

use fieldsync_core::config::CrossMappings;
use fieldsync_core::engine::{ReconcileInputs, association_plan, reconcile};
use fieldsync_core::model::MigrationStatus;
use fieldsync_core::snapshot::{SourceSnapshot, TargetSnapshot};
use fieldsync_core::store::MappingStore;

const SOURCE_JSON: &str = r#"{
    "fields": [
        {"id": "customfield_10001", "name": "Severity", "type": "option",
         "subtype": "com.vendor.plugin:select", "category": "source-native-custom"},
        {"id": "customfield_10002", "name": "Platform", "type": "option-with-child",
         "subtype": "com.vendor.plugin:cascadingselect", "category": "source-native-custom"},
        {"id": "customfield_10003", "name": "Reviewer", "type": "user",
         "subtype": "com.vendor.plugin:userpicker", "category": "app-custom"},
        {"id": "customfield_10004", "name": "Forgotten", "type": "string",
         "category": "source-native-custom"}
    ],
    "assignments": [
        {"field_id": "customfield_10001", "project_scope_id": "P1",
         "type_scope_id": "bug", "required": true,
         "allowed_values": {"mode": "flat",
             "options": [{"label": "High", "id": "1"}, {"label": "Low"}]}},
        {"field_id": "customfield_10001", "project_scope_id": "P2",
         "type_scope_id": "task",
         "allowed_values": {"mode": "flat", "options": [{"label": "Medium"}]}},
        {"field_id": "customfield_10002", "project_scope_id": "P1",
         "type_scope_id": "bug",
         "allowed_values": {"mode": "cascading",
             "parents": [{"label": "Linux"}, {"label": "Windows"}],
             "children": {"Linux": [{"label": "x86"}, {"label": "arm"}],
                          "Windows": [{"label": "x86"}]}}},
        {"field_id": "customfield_10003", "project_scope_id": "P1",
         "type_scope_id": "bug",
         "allowed_values": "certainly not a descriptor"}
    ]
}"#;

const TARGET_JSON: &str = r#"{
    "fields": [
        {"id": 31, "name": "severity", "format": "list",
         "possible_values": ["High", "Low", "Medium"],
         "tracker_ids": [1], "project_ids": [1]}
    ]
}"#;

const CROSS_TOML: &str = r#"
[projects]
"P1" = 1
"P2" = 2

[trackers]
"bug" = 1
"task" = 2
"#;

#[test]
fn full_pass_from_files_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let source_path = dir.path().join("source.json");
    let target_path = dir.path().join("target.json");
    let cross_path = dir.path().join("mappings.toml");
    fs::write(&source_path, SOURCE_JSON).unwrap();
    fs::write(&target_path, TARGET_JSON).unwrap();
    fs::write(&cross_path, CROSS_TOML).unwrap();

    let source = SourceSnapshot::from_file(&source_path).unwrap();
    let target = TargetSnapshot::from_file(&target_path).unwrap();
    let cross = CrossMappings::from_file(&cross_path).unwrap();
    let assignments = source.assignments();

    // The malformed allowed_values payload degraded, not failed.
    assert!(
        assignments
            .iter()
            .find(|a| a.field_id == "customfield_10003")
            .unwrap()
            .allowed_values
            .is_none()
    );

    let store = MappingStore::open(dir.path().join("mappings.db")).unwrap();
    let inputs = ReconcileInputs {
        fields: &source.fields,
        assignments: &assignments,
        target: &target,
        cross: &cross,
    };

    let first = reconcile(&store, &inputs).unwrap();
    // Severity matched (scope drift to project 2 / tracker 2); Platform
    // produced child + synthetic parent; Reviewer needs a human;
    // Forgotten has no usage.
    assert_eq!(first.matched, 1);
    assert_eq!(first.ready_for_creation, 2);
    assert_eq!(first.manual_review, 1);
    assert_eq!(first.ignored, 1);

    let severity = store.fetch_committed("customfield_10001").unwrap().unwrap();
    assert_eq!(severity.status, MigrationStatus::ReadyForUpdate);
    assert_eq!(severity.target_field_id, Some(31));

    let platform = store.fetch_committed("customfield_10002").unwrap().unwrap();
    assert_eq!(platform.proposed.possible_values, ["arm", "x86"]);
    assert_eq!(
        platform.proposed.value_dependencies["Linux"],
        ["arm", "x86"]
    );
    let parents: BTreeSet<String> = platform
        .proposed
        .value_dependencies
        .keys()
        .cloned()
        .collect();
    let parent_row = store
        .fetch_committed("customfield_10002::parent")
        .unwrap()
        .unwrap();
    let parent_values: BTreeSet<String> =
        parent_row.proposed.possible_values.iter().cloned().collect();
    assert_eq!(parents, parent_values);
    assert_eq!(platform.parent_mapping_id, parent_row.id);

    // Second pass over identical inputs changes nothing.
    let second = reconcile(&store, &inputs).unwrap();
    assert_eq!(second.unchanged + second.skipped, 5);
    assert_eq!(second.matched, 0);
    assert_eq!(second.ready_for_creation, 0);
    assert_eq!(second.manual_review, 0);
    assert_eq!(second.manual_overrides_preserved, 0);

    // The association plan covers the drifted Severity scope and is a
    // pure function of store + snapshot.
    let plan = association_plan(&store, &target).unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].target_field_id, 31);
    assert_eq!(plan[0].missing_project_ids, [2].into_iter().collect());
}
