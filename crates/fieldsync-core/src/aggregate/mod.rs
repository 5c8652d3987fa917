//! Allowed-values aggregation across usage contexts.
//!
//! One source field is assigned to many (project-scope, type-scope)
//! contexts, each with its own local option set. The aggregator merges
//! all of them into one canonical [`AllowedValuesDescriptor`]:
//! label-keyed union, id-bearing entries preferred over label-only ones,
//! labels normalized before use as merge keys. `BTreeMap` keying makes
//! the output independent of assignment iteration order.
//!
//! When assignments disagree on mode (one flat, one cascading) the
//! first-established mode keeps the structure and the conflict is
//! surfaced on the result so the engine can raise a manual-review
//! reason instead of hiding a real data inconsistency.

use std::collections::BTreeMap;

use crate::model::{AllowedValuesDescriptor, FieldAssignment, FieldOption};

/// Result of aggregating every assignment of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedValues {
    /// The merged descriptor, or `None` when no assignment carried one.
    pub descriptor: Option<AllowedValuesDescriptor>,
    /// Assignments disagreed on flat vs cascading mode; the conflicting
    /// contributions were discarded.
    pub mode_conflict: bool,
}

/// Normalizes an option label for use as a merge key and in output.
///
/// Trims surrounding whitespace. A label that is itself a serialized
/// object exposing a `labels` array (the source platform stores
/// multi-label values this way) is decoded and rendered as a
/// comma-joined, sorted string so that semantically equal payloads merge
/// regardless of their original key order.
#[must_use]
pub fn normalize_label(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if let Some(labels) = value.get("labels").and_then(|v| v.as_array()) {
                let mut parts: Vec<String> = labels
                    .iter()
                    .filter_map(|l| l.as_str())
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect();
                parts.sort();
                parts.dedup();
                return parts.join(", ");
            }
        }
    }
    trimmed.to_string()
}

/// Label-keyed option union. An entry that already carries a stable
/// option id is never displaced by a label-only entry.
fn merge_option(into: &mut BTreeMap<String, FieldOption>, option: &FieldOption) {
    let label = normalize_label(&option.label);
    if label.is_empty() {
        return;
    }
    let candidate = FieldOption {
        id: option.id.clone(),
        label: label.clone(),
    };
    match into.get_mut(&label) {
        Some(existing) => {
            if existing.id.is_none() && candidate.id.is_some() {
                existing.id = candidate.id;
            }
        },
        None => {
            into.insert(label, candidate);
        },
    }
}

#[derive(Default)]
struct FlatBuilder {
    options: BTreeMap<String, FieldOption>,
}

#[derive(Default)]
struct CascadingBuilder {
    parents: BTreeMap<String, FieldOption>,
    children: BTreeMap<String, BTreeMap<String, FieldOption>>,
}

enum Builder {
    Flat(FlatBuilder),
    Cascading(CascadingBuilder),
}

impl Builder {
    fn merge(&mut self, descriptor: &AllowedValuesDescriptor) -> bool {
        match (self, descriptor) {
            (Self::Flat(builder), AllowedValuesDescriptor::Flat { options }) => {
                for option in options {
                    merge_option(&mut builder.options, option);
                }
                true
            },
            (Self::Cascading(builder), AllowedValuesDescriptor::Cascading { parents, children }) => {
                for parent in parents {
                    merge_option(&mut builder.parents, parent);
                }
                for (parent_label, child_options) in children {
                    let key = normalize_label(parent_label);
                    if key.is_empty() {
                        continue;
                    }
                    let bucket = builder.children.entry(key).or_default();
                    for child in child_options {
                        merge_option(bucket, child);
                    }
                }
                true
            },
            // Mode conflict: keep the first-established structure.
            _ => false,
        }
    }

    fn finish(self) -> AllowedValuesDescriptor {
        match self {
            Self::Flat(builder) => AllowedValuesDescriptor::Flat {
                options: builder.options.into_values().collect(),
            },
            Self::Cascading(builder) => AllowedValuesDescriptor::Cascading {
                parents: builder.parents.into_values().collect(),
                children: builder
                    .children
                    .into_iter()
                    .map(|(parent, options)| (parent, options.into_values().collect()))
                    .collect(),
            },
        }
    }
}

/// Merges the allowed-values descriptors of every assignment for one
/// field into a single canonical descriptor.
///
/// Deterministic: any permutation of mode-consistent `assignments`
/// yields an identical result. Assignments without a descriptor
/// contribute nothing.
#[must_use]
pub fn aggregate(assignments: &[&FieldAssignment]) -> AggregatedValues {
    let mut builder: Option<Builder> = None;
    let mut mode_conflict = false;

    for assignment in assignments {
        let Some(descriptor) = &assignment.allowed_values else {
            continue;
        };
        match builder.as_mut() {
            None => {
                let mut fresh = match descriptor {
                    AllowedValuesDescriptor::Flat { .. } => Builder::Flat(FlatBuilder::default()),
                    AllowedValuesDescriptor::Cascading { .. } => {
                        Builder::Cascading(CascadingBuilder::default())
                    },
                };
                fresh.merge(descriptor);
                builder = Some(fresh);
            },
            Some(existing) => {
                if !existing.merge(descriptor) {
                    mode_conflict = true;
                }
            },
        }
    }

    AggregatedValues {
        descriptor: builder.map(Builder::finish),
        mode_conflict,
    }
}
