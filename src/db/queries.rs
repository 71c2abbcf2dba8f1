use rusqlite::{params, OptionalExtension};
use serde::Serialize;

use super::{Database, DbError};

// ---------------------------------------------------------------------------
// Row types: one struct per table, fields mirror columns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeRow {
    pub recipient_id: String,
    pub seq: i64,
    pub kind: String,
    pub subtype: String,
    pub wire_json: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientMarkRow {
    pub recipient_id: String,
    pub last_assigned_seq: i64,
    pub last_delivered_seq: i64,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMark {
    pub recipient_id: String,
    pub seq: i64,
}

/// Writes accumulated by the log writer and committed in one transaction.
#[derive(Debug, Clone, Default)]
pub struct LogBatch {
    pub appends: Vec<EnvelopeRow>,
    pub delivered: Vec<DeliveredMark>,
}

impl LogBatch {
    pub fn is_empty(&self) -> bool {
        self.appends.is_empty() && self.delivered.is_empty()
    }

    pub fn len(&self) -> usize {
        self.appends.len() + self.delivered.len()
    }
}

fn envelope_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EnvelopeRow> {
    Ok(EnvelopeRow {
        recipient_id: row.get(0)?,
        seq: row.get(1)?,
        kind: row.get(2)?,
        subtype: row.get(3)?,
        wire_json: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn marks_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecipientMarkRow> {
    Ok(RecipientMarkRow {
        recipient_id: row.get(0)?,
        last_assigned_seq: row.get(1)?,
        last_delivered_seq: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

// ---------------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------------

/// Commit a batch of appends and delivery marks atomically.
///
/// Appends are idempotent on `(recipient_id, seq)`; marks only ever move
/// forward.
pub fn write_log_batch(db: &Database, batch: &LogBatch, updated_at: &str) -> Result<(), DbError> {
    let conn = db.conn();
    let tx = conn.unchecked_transaction()?;
    {
        let mut insert = tx.prepare_cached(
            "INSERT OR IGNORE INTO envelope_log
                (recipient_id, seq, kind, subtype, wire_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        let mut assigned = tx.prepare_cached(
            "INSERT INTO recipient_marks
                (recipient_id, last_assigned_seq, last_delivered_seq, updated_at)
             VALUES (?1, ?2, 0, ?3)
             ON CONFLICT(recipient_id) DO UPDATE SET
                last_assigned_seq = MAX(last_assigned_seq, excluded.last_assigned_seq),
                updated_at = excluded.updated_at",
        )?;
        for row in &batch.appends {
            insert.execute(params![
                row.recipient_id,
                row.seq,
                row.kind,
                row.subtype,
                row.wire_json,
                row.created_at,
            ])?;
            assigned.execute(params![row.recipient_id, row.seq, updated_at])?;
        }

        let mut delivered = tx.prepare_cached(
            "INSERT INTO recipient_marks
                (recipient_id, last_assigned_seq, last_delivered_seq, updated_at)
             VALUES (?1, ?2, ?2, ?3)
             ON CONFLICT(recipient_id) DO UPDATE SET
                last_delivered_seq = MAX(last_delivered_seq, excluded.last_delivered_seq),
                updated_at = excluded.updated_at",
        )?;
        for mark in &batch.delivered {
            delivered.execute(params![mark.recipient_id, mark.seq, updated_at])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Delete envelopes created before `cutoff`. Marks are kept so sequence
/// numbering survives pruning.
pub fn prune_envelopes_before(db: &Database, cutoff: &str) -> Result<usize, DbError> {
    let conn = db.conn();
    let deleted = conn.execute(
        "DELETE FROM envelope_log WHERE created_at < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// Envelopes for `recipient_id` with `seq > after_seq`, ascending.
pub fn list_envelopes_after(
    db: &Database,
    recipient_id: &str,
    after_seq: i64,
    limit: usize,
) -> Result<Vec<EnvelopeRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(
        "SELECT recipient_id, seq, kind, subtype, wire_json, created_at
         FROM envelope_log
         WHERE recipient_id = ?1 AND seq > ?2
         ORDER BY seq ASC
         LIMIT ?3",
    )?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt
        .query_map(params![recipient_id, after_seq, limit], envelope_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_recipient_marks(db: &Database) -> Result<Vec<RecipientMarkRow>, DbError> {
    let conn = db.conn();
    let mut stmt = conn.prepare(
        "SELECT recipient_id, last_assigned_seq, last_delivered_seq, updated_at
         FROM recipient_marks
         ORDER BY recipient_id",
    )?;
    let rows = stmt
        .query_map([], marks_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_recipient_marks(
    db: &Database,
    recipient_id: &str,
) -> Result<Option<RecipientMarkRow>, DbError> {
    let conn = db.conn();
    let row = conn
        .query_row(
            "SELECT recipient_id, last_assigned_seq, last_delivered_seq, updated_at
             FROM recipient_marks
             WHERE recipient_id = ?1",
            params![recipient_id],
            marks_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn count_envelopes(db: &Database) -> Result<i64, DbError> {
    let conn = db.conn();
    let count = conn.query_row("SELECT COUNT(*) FROM envelope_log", [], |row| row.get(0))?;
    Ok(count)
}
