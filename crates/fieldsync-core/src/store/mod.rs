//! `SQLite`-backed mapping store.
//!
//! One row per reconciled field (plus synthetic cascading-parent rows),
//! keyed by source field id. The engine commits rows independently, so a
//! crash mid-batch leaves the store resumable; no cross-row transaction
//! spans a run.

// SQLite returns i64 for row IDs and counts; they're always non-negative
// here. Mutex poisoning indicates a panic in another thread, which is
// unrecoverable.
#![allow(clippy::missing_panics_doc)]

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};
use thiserror::Error;
use tracing::warn;

use crate::model::{FieldMapping, MigrationStatus, ProposedState};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Errors that can occur during mapping-store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A proposed state could not be serialized for storage.
    #[error("failed to encode proposed state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The mapping store.
///
/// Connection access is serialized through a mutex; the engine is a
/// single-threaded batch process and only needs exclusion against
/// concurrent readers opened elsewhere.
pub struct MappingStore {
    conn: Arc<Mutex<Connection>>,
}

impl MappingStore {
    /// Opens or creates a mapping store at the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Inserts or updates the row for `mapping.source_field_id` and
    /// returns the row id.
    ///
    /// `created_at` is preserved on update; everything else is written
    /// from the given mapping.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    pub fn upsert(&self, mapping: &FieldMapping) -> Result<i64, StoreError> {
        let proposed = serde_json::to_string(&mapping.proposed)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO field_mappings (
                 source_field_id, source_field_name, target_field_id,
                 parent_mapping_id, proposed_state, notes, migration_status,
                 automation_hash, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(source_field_id) DO UPDATE SET
                 source_field_name = excluded.source_field_name,
                 target_field_id = excluded.target_field_id,
                 parent_mapping_id = excluded.parent_mapping_id,
                 proposed_state = excluded.proposed_state,
                 notes = excluded.notes,
                 migration_status = excluded.migration_status,
                 automation_hash = excluded.automation_hash,
                 updated_at = excluded.updated_at",
            params![
                mapping.source_field_id,
                mapping.source_field_name,
                mapping.target_field_id,
                mapping.parent_mapping_id,
                proposed,
                mapping.notes,
                mapping.status.as_str(),
                mapping.automation_hash,
                mapping.created_at.to_rfc3339(),
                mapping.updated_at.to_rfc3339(),
            ],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM field_mappings WHERE source_field_id = ?1",
            params![mapping.source_field_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Reads the committed row for a source field id, if one exists.
    ///
    /// This is the read-before-write entry point for the hash gate: the
    /// engine always hashes what this returns, never an in-process copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn fetch_committed(
        &self,
        source_field_id: &str,
    ) -> Result<Option<FieldMapping>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, source_field_id, source_field_name, target_field_id,
                    parent_mapping_id, proposed_state, notes, migration_status,
                    automation_hash, created_at, updated_at
             FROM field_mappings
             WHERE source_field_id = ?1",
        )?;
        let mapping = stmt
            .query_row(params![source_field_id], map_row)
            .optional()?;
        Ok(mapping)
    }

    /// Deletes the row for a source field id. Returns whether a row
    /// existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn delete(&self, source_field_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM field_mappings WHERE source_field_id = ?1",
            params![source_field_id],
        )?;
        Ok(deleted > 0)
    }

    /// Lists every mapping, ordered by source field id for stable
    /// output.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn list(&self) -> Result<Vec<FieldMapping>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, source_field_id, source_field_name, target_field_id,
                    parent_mapping_id, proposed_state, notes, migration_status,
                    automation_hash, created_at, updated_at
             FROM field_mappings
             ORDER BY source_field_id ASC",
        )?;
        let mappings = stmt
            .query_map([], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(mappings)
    }

    /// Deletes every mapping whose source field id is absent from
    /// `live_ids`. Synthetic parent rows follow their base field.
    /// Returns the number of purged rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the purge fails.
    pub fn purge_missing(&self, live_ids: &BTreeSet<String>) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, source_field_id FROM field_mappings")?;
        let stored: Vec<(i64, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut purged = 0u64;
        for (id, source_field_id) in stored {
            let base = crate::cascade::base_field_id(&source_field_id);
            if live_ids.contains(base) {
                continue;
            }
            conn.execute("DELETE FROM field_mappings WHERE id = ?1", params![id])?;
            purged += 1;
        }
        Ok(purged)
    }
}

/// Maps a `field_mappings` row. Corrupt JSON in `proposed_state` and
/// unknown status tokens degrade to defaults so one bad row cannot halt
/// the batch.
fn map_row(row: &Row<'_>) -> rusqlite::Result<FieldMapping> {
    let source_field_id: String = row.get(1)?;
    let proposed_raw: String = row.get(5)?;
    let proposed: ProposedState = serde_json::from_str(&proposed_raw).unwrap_or_else(|err| {
        warn!(
            source_field_id = %source_field_id,
            error = %err,
            "malformed proposed_state column, treating as empty"
        );
        ProposedState::default()
    });

    let status_raw: String = row.get(7)?;
    let status = MigrationStatus::parse(&status_raw).unwrap_or_else(|| {
        warn!(
            source_field_id = %source_field_id,
            token = %status_raw,
            "unknown migration_status token, treating as PENDING_ANALYSIS"
        );
        MigrationStatus::PendingAnalysis
    });

    Ok(FieldMapping {
        id: Some(row.get(0)?),
        source_field_id,
        source_field_name: row.get(2)?,
        target_field_id: row.get(3)?,
        parent_mapping_id: row.get(4)?,
        proposed,
        notes: row.get(6)?,
        status,
        automation_hash: row.get(8)?,
        created_at: parse_timestamp(&row.get::<_, String>(9)?),
        updated_at: parse_timestamp(&row.get::<_, String>(10)?),
    })
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
