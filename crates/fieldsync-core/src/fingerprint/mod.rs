//! Automation-hash computation.
//!
//! The automation hash is a SHA-256 fingerprint of the engine-managed
//! part of a mapping row: resolved target field id, status, proposed
//! state, and parent mapping reference. Free-text notes are excluded by
//! construction ([`crate::model::ProposedState`] does not carry them),
//! so annotating a row never looks like a manual override.
//!
//! The fingerprint is computed over the canonical JSON emission of the
//! inputs (see [`canonical`]), making it insensitive to key ordering and
//! to scalar-array ordering produced upstream.

mod canonical;

pub use canonical::canonicalize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::model::{FieldMapping, MigrationStatus, ProposedState};

/// Computes the automation hash of one mapping state.
///
/// Callers hashing a persisted row must pass the values as committed in
/// the store, never a cached in-process copy; the override-detection
/// invariant depends on read-before-write.
#[must_use]
pub fn automation_hash(
    target_field_id: Option<i64>,
    status: MigrationStatus,
    proposed: &ProposedState,
    parent_mapping_id: Option<i64>,
) -> String {
    // ProposedState serializes to an object of scalars, scalar arrays,
    // and a string->scalar-array map; canonical emission covers all of
    // it. Serialization of a plain struct cannot fail.
    let proposed_value =
        serde_json::to_value(proposed).unwrap_or(serde_json::Value::Null);
    let state = json!({
        "target_field_id": target_field_id,
        "status": status.as_str(),
        "proposed_state": proposed_value,
        "parent_mapping_id": parent_mapping_id,
    });
    let bytes = canonicalize(&state);
    let digest = Sha256::digest(bytes.as_bytes());
    hex::encode(digest)
}

/// Hashes the engine-managed part of a mapping row as currently held.
#[must_use]
pub fn hash_of_mapping(mapping: &FieldMapping) -> String {
    automation_hash(
        mapping.target_field_id,
        mapping.status,
        &mapping.proposed,
        mapping.parent_mapping_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldMapping;

    #[test]
    fn hash_is_stable_across_calls() {
        let proposed = ProposedState {
            name: Some("Severity".to_string()),
            format: Some("list".to_string()),
            possible_values: vec!["High".to_string(), "Low".to_string()],
            ..ProposedState::default()
        };
        let a = automation_hash(Some(7), MigrationStatus::MatchFound, &proposed, None);
        let b = automation_hash(Some(7), MigrationStatus::MatchFound, &proposed, None);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hash_ignores_possible_value_order() {
        let mut forward = ProposedState::default();
        forward.possible_values = vec!["a".to_string(), "b".to_string()];
        let mut reversed = ProposedState::default();
        reversed.possible_values = vec!["b".to_string(), "a".to_string()];

        assert_eq!(
            automation_hash(None, MigrationStatus::ReadyForCreation, &forward, None),
            automation_hash(None, MigrationStatus::ReadyForCreation, &reversed, None),
        );
    }

    #[test]
    fn hash_changes_with_status_and_target() {
        let proposed = ProposedState::default();
        let base = automation_hash(None, MigrationStatus::ReadyForCreation, &proposed, None);
        assert_ne!(
            base,
            automation_hash(None, MigrationStatus::MatchFound, &proposed, None)
        );
        assert_ne!(
            base,
            automation_hash(Some(1), MigrationStatus::ReadyForCreation, &proposed, None)
        );
        assert_ne!(
            base,
            automation_hash(None, MigrationStatus::ReadyForCreation, &proposed, Some(9))
        );
    }

    #[test]
    fn notes_never_affect_the_hash() {
        let mut mapping = FieldMapping::new("f1", "Severity");
        mapping.status = MigrationStatus::ReadyForCreation;
        let before = hash_of_mapping(&mapping);
        mapping.notes = Some("operator annotation".to_string());
        assert_eq!(hash_of_mapping(&mapping), before);
    }
}
