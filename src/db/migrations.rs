use rusqlite::Connection;

use super::DbError;

struct Migration {
    version: i64,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: r#"
CREATE TABLE envelope_log (
    recipient_id    TEXT NOT NULL,
    seq             INTEGER NOT NULL,
    kind            TEXT NOT NULL,
    subtype         TEXT NOT NULL,
    wire_json       TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    PRIMARY KEY (recipient_id, seq)
);

CREATE INDEX idx_envelope_log_created ON envelope_log(created_at);
"#,
    },
    Migration {
        version: 2,
        sql: r#"
CREATE TABLE recipient_marks (
    recipient_id        TEXT PRIMARY KEY,
    last_assigned_seq   INTEGER NOT NULL DEFAULT 0,
    last_delivered_seq  INTEGER NOT NULL DEFAULT 0,
    updated_at          TEXT NOT NULL
);
"#,
    },
];

/// Apply every migration newer than the recorded schema version.
pub(super) fn run_migrations(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );",
    )?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql).map_err(|e| {
            DbError::Migration(format!("envelope log schema v{}: {e}", migration.version))
        })?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at)
             VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            [migration.version],
        )?;
        tx.commit()?;
        tracing::info!(version = migration.version, "envelope log schema upgraded");
    }

    Ok(())
}
