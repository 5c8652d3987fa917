//! Cascading (parent/child) field resolution.
//!
//! A cascading select is reconciled as two target fields: a synthetic
//! parent enumeration plus the child field itself, linked by row id in
//! the mapping store (the child holds a one-directional, nullable
//! reference; the parent row is always persisted first). This module
//! computes both sides from one aggregated cascading descriptor and
//! enforces the parent/dependency symmetry invariant.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::model::AllowedValuesDescriptor;

/// Suffix of the reserved synthetic parent id. Source field ids never
/// contain `::`, so synthetic ids cannot collide with real ones.
const PARENT_SUFFIX: &str = "::parent";

/// Structural failures while resolving a cascading descriptor. These are
/// escalated to manual review by the engine, never silently dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CascadeError {
    /// The descriptor is flat; nothing to resolve.
    #[error("descriptor is not cascading")]
    NotCascading,

    /// The parent option list is empty.
    #[error("cascading descriptor has no parent options")]
    EmptyParents,

    /// A parent has no child options at all.
    #[error("cascading parent '{parent}' has no child options")]
    EmptyChildren {
        /// The offending parent label.
        parent: String,
    },
}

/// Resolved cascading structure, ready to be carried in proposals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadingResolution {
    /// Possible values of the synthetic parent field (the parent labels).
    pub parent_possible_values: Vec<String>,
    /// Possible values of the child field: the flattened, deduplicated
    /// union of every parent's child options.
    pub child_possible_values: Vec<String>,
    /// Parent label to child labels. Keys are exactly the parent list.
    pub value_dependencies: BTreeMap<String, Vec<String>>,
}

/// Derives the reserved synthetic parent mapping id for a source field.
#[must_use]
pub fn synthetic_parent_id(source_field_id: &str) -> String {
    format!("{source_field_id}{PARENT_SUFFIX}")
}

/// True when `id` is a synthetic parent id produced by
/// [`synthetic_parent_id`].
#[must_use]
pub fn is_synthetic_parent_id(id: &str) -> bool {
    id.ends_with(PARENT_SUFFIX)
}

/// The source field id a synthetic parent id was derived from.
#[must_use]
pub fn base_field_id(id: &str) -> &str {
    id.strip_suffix(PARENT_SUFFIX).unwrap_or(id)
}

/// Resolves an aggregated cascading descriptor into parent and child
/// proposals.
///
/// Symmetry is restored before validation: a dependency key missing from
/// the parent list is promoted to a parent, so the output always
/// satisfies `set(parents) == set(value_dependencies.keys())`.
///
/// # Errors
///
/// Returns [`CascadeError`] when the descriptor is flat, has no parents,
/// or has a parent without children. Empty structures are hard failures
/// for the field: the engine escalates them to manual review.
pub fn resolve(descriptor: &AllowedValuesDescriptor) -> Result<CascadingResolution, CascadeError> {
    let AllowedValuesDescriptor::Cascading { parents, children } = descriptor else {
        return Err(CascadeError::NotCascading);
    };

    let mut parent_labels: BTreeSet<String> =
        parents.iter().map(|p| p.label.clone()).collect();
    for key in children.keys() {
        parent_labels.insert(key.clone());
    }
    if parent_labels.is_empty() {
        return Err(CascadeError::EmptyParents);
    }

    let mut value_dependencies = BTreeMap::new();
    let mut child_union = BTreeSet::new();
    for parent in &parent_labels {
        let kids: BTreeSet<String> = children
            .get(parent)
            .map(|options| options.iter().map(|o| o.label.clone()).collect())
            .unwrap_or_default();
        if kids.is_empty() {
            return Err(CascadeError::EmptyChildren {
                parent: parent.clone(),
            });
        }
        child_union.extend(kids.iter().cloned());
        value_dependencies.insert(parent.clone(), kids.into_iter().collect());
    }

    Ok(CascadingResolution {
        parent_possible_values: parent_labels.into_iter().collect(),
        child_possible_values: child_union.into_iter().collect(),
        value_dependencies,
    })
}
