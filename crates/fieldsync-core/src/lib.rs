//! fieldsync-core - custom-field reconciliation engine.
//!
//! Reconciles custom-field definitions between a source ticket-tracking
//! platform and a target platform. The engine classifies each source
//! field, aggregates its allowed values across every usage context,
//! resolves cascading parent/child structures, matches the resulting
//! proposal against the target system's existing fields, and persists one
//! [`model::FieldMapping`] row per field.
//!
//! Repeated runs are idempotent: every automated write stores an
//! automation hash of the written state, and a row whose committed state
//! no longer matches its stored hash has been edited by a human and is
//! never overwritten (see [`engine`]).
//!
//! # Data flow
//!
//! ```text
//! SourceSnapshot ---> classify ---> aggregate ---> cascade
//!                                                    |
//!                                                    v
//! TargetSnapshot -------------------------------> matcher
//!                                                    |
//!                                                    v
//!                         engine (hash gate) ---> MappingStore
//! ```
//!
//! The engine performs no network I/O: all inputs are materialized
//! snapshots (see [`snapshot`] and [`config`]) and the only mutable state
//! is the sqlite-backed [`store::MappingStore`].

pub mod aggregate;
pub mod cascade;
pub mod classify;
pub mod config;
pub mod engine;
pub mod fingerprint;
pub mod matcher;
pub mod model;
pub mod snapshot;
pub mod store;
