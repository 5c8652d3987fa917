//! Command implementations.

use std::path::Path;

use anyhow::{Context, Result};
use fieldsync_core::config::CrossMappings;
use fieldsync_core::engine::{ReconcileInputs, association_plan};
use fieldsync_core::snapshot::{SourceSnapshot, TargetSnapshot};
use fieldsync_core::store::MappingStore;

/// Runs one reconciliation pass and prints the counters.
pub fn reconcile(
    store_path: &Path,
    source_path: &Path,
    target_path: &Path,
    mappings_path: &Path,
) -> Result<()> {
    let source = SourceSnapshot::from_file(source_path)
        .with_context(|| format!("loading source snapshot {}", source_path.display()))?;
    let target = TargetSnapshot::from_file(target_path)
        .with_context(|| format!("loading target snapshot {}", target_path.display()))?;
    let cross = CrossMappings::from_file(mappings_path)
        .with_context(|| format!("loading cross-mappings {}", mappings_path.display()))?;
    let store = open_store(store_path)?;

    let assignments = source.assignments();
    let summary = fieldsync_core::engine::reconcile(
        &store,
        &ReconcileInputs {
            fields: &source.fields,
            assignments: &assignments,
            target: &target,
            cross: &cross,
        },
    )
    .context("reconciliation pass failed")?;

    println!("matched:             {}", summary.matched);
    println!("ready for creation:  {}", summary.ready_for_creation);
    println!("manual review:       {}", summary.manual_review);
    println!("overrides preserved: {}", summary.manual_overrides_preserved);
    println!("ignored:             {}", summary.ignored);
    println!("skipped:             {}", summary.skipped);
    println!("unchanged:           {}", summary.unchanged);
    println!("purged:              {}", summary.purged);
    Ok(())
}

/// Prints the pending association plan as JSON.
pub fn plan(store_path: &Path, target_path: &Path) -> Result<()> {
    let target = TargetSnapshot::from_file(target_path)
        .with_context(|| format!("loading target snapshot {}", target_path.display()))?;
    let store = open_store(store_path)?;

    let actions = association_plan(&store, &target).context("deriving association plan")?;
    println!("{}", serde_json::to_string_pretty(&actions)?);
    Ok(())
}

/// Lists every mapping with its status.
pub fn status(store_path: &Path) -> Result<()> {
    let store = open_store(store_path)?;
    let mappings = store.list().context("listing mappings")?;
    for mapping in &mappings {
        let target = mapping
            .target_field_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        println!(
            "{:<30} {:<45} target={:<8} {}",
            mapping.status.as_str(),
            mapping.source_field_id,
            target,
            mapping.source_field_name,
        );
    }
    println!("{} mapping(s)", mappings.len());
    Ok(())
}

fn open_store(path: &Path) -> Result<MappingStore> {
    MappingStore::open(path).with_context(|| format!("opening mapping store {}", path.display()))
}
