//! Field classification: declared source type/subtype to target format.
//!
//! A prioritized lookup: any recognized subtype token wins by substring
//! match; otherwise the declared coarse type decides. The function is
//! total — anything outside both tables classifies as a manual-review
//! string field rather than erroring, so one exotic field can never halt
//! a batch.

use serde::{Deserialize, Serialize};

/// Outcome of classifying one source field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Target field format token (e.g. `string`, `text`, `list`, `date`).
    pub target_format: String,
    /// Field accepts multiple values.
    pub is_multiple: bool,
    /// The proposal is incomplete without a possible-values list.
    pub requires_possible_values: bool,
    /// A human must review this mapping before it proceeds.
    pub requires_manual_review: bool,
    /// Field is a two-level cascading select; the cascade resolver runs.
    pub is_cascading: bool,
    /// Operator-facing explanation, when one is warranted.
    pub note: Option<String>,
}

impl Classification {
    fn plain(format: &str) -> Self {
        Self {
            target_format: format.to_string(),
            is_multiple: false,
            requires_possible_values: false,
            requires_manual_review: false,
            is_cascading: false,
            note: None,
        }
    }

    fn list(multiple: bool) -> Self {
        Self {
            is_multiple: multiple,
            requires_possible_values: true,
            ..Self::plain("list")
        }
    }

    fn cascading() -> Self {
        Self {
            is_cascading: true,
            ..Self::list(false)
        }
    }

    fn manual(format: &str, note: impl Into<String>) -> Self {
        Self {
            requires_manual_review: true,
            note: Some(note.into()),
            ..Self::plain(format)
        }
    }

    fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Subtype tokens, checked by substring in priority order. Longer and
/// more specific tokens come first so `cascadingselect` is never
/// shadowed by `select`.
const SUBTYPE_TOKENS: &[&str] = &[
    "cascadingselect",
    "multicheckboxes",
    "multiselect",
    "radiobuttons",
    "select",
    "labels",
    "textarea",
    "textfield",
    "datetime",
    "datepicker",
    "float",
    "userpicker",
    "grouppicker",
    "url",
];

fn classify_subtype(token: &str) -> Classification {
    match token {
        "cascadingselect" => Classification::cascading(),
        "multicheckboxes" | "multiselect" => Classification::list(true),
        "radiobuttons" | "select" => Classification::list(false),
        "labels" => {
            Classification::list(true).with_note("label values harvested from usage data")
        },
        "textarea" => Classification::plain("text"),
        "textfield" => Classification::plain("string"),
        "datetime" => {
            Classification::plain("date").with_note("time component is dropped by the target")
        },
        "datepicker" => Classification::plain("date"),
        "float" => Classification::plain("float"),
        "userpicker" => Classification::manual(
            "user",
            "user picker: account mapping cannot be derived automatically",
        ),
        "grouppicker" => Classification::manual(
            "user",
            "group picker: group membership cannot be derived automatically",
        ),
        "url" => Classification::plain("link"),
        // SUBTYPE_TOKENS and this match are kept in lockstep.
        _ => unreachable!("unlisted subtype token"),
    }
}

fn classify_coarse_type(field_type: &str) -> Classification {
    match field_type {
        "string" => Classification::plain("string"),
        "number" => Classification::plain("float"),
        "date" => Classification::plain("date"),
        "datetime" => {
            Classification::plain("date").with_note("time component is dropped by the target")
        },
        "array" => Classification::list(true),
        "option" => Classification::list(false),
        "option-with-child" => Classification::cascading(),
        "user" => Classification::manual(
            "user",
            "user-valued field: account mapping cannot be derived automatically",
        ),
        "group" => Classification::manual(
            "user",
            "group-valued field: group membership cannot be derived automatically",
        ),
        "object" => Classification::manual(
            "string",
            "object-shaped payload: structure inference is not automated",
        ),
        "any" => Classification::manual(
            "string",
            "untyped field: verify the target format by hand",
        ),
        other => Classification::manual(
            "string",
            format!("unrecognized declared type '{other}'"),
        ),
    }
}

/// Classifies a source field's declared type and subtype.
///
/// Total: every `(field_type, subtype)` pair produces a classification.
/// Subtype tokens are matched by substring against the declared subtype
/// (subtype identifiers in the source platform embed their token in a
/// longer plugin key), and a subtype hit returns immediately without
/// consulting the coarse type.
#[must_use]
pub fn classify(field_type: &str, subtype: Option<&str>) -> Classification {
    if let Some(subtype) = subtype {
        let subtype = subtype.trim();
        for token in SUBTYPE_TOKENS {
            if subtype.contains(token) {
                return classify_subtype(token);
            }
        }
        // Unknown subtype: the coarse type may still be meaningful, but
        // the declared intent is unknown, so force review either way.
        let mut classification = classify_coarse_type(field_type.trim());
        classification.requires_manual_review = true;
        if classification.note.is_none() {
            classification.note = Some(format!("unrecognized subtype '{subtype}'"));
        }
        return classification;
    }
    classify_coarse_type(field_type.trim())
}
