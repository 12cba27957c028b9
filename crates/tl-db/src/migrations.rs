//! Schema migrations, embedded as SQL and tracked in `schema_migrations`.

use rusqlite::Connection;
use tl_core::{Error, Result};

/// V1: processing queue and segment records.
const V1_INITIAL: &str = r#"
-- Chunk processing jobs. The payload is only (session_id, chunk_index);
-- the chunk bytes stay on disk.
CREATE TABLE jobs (
    id            TEXT PRIMARY KEY,
    session_id    TEXT NOT NULL,
    chunk_index   INTEGER NOT NULL,
    status        TEXT NOT NULL DEFAULT 'queued',
    attempts      INTEGER NOT NULL DEFAULT 0,
    max_attempts  INTEGER NOT NULL DEFAULT 3,
    error         TEXT,
    locked_by     TEXT,
    locked_at     TEXT,
    created_at    TEXT NOT NULL,
    started_at    TEXT,
    completed_at  TEXT,
    scheduled_for TEXT
);

CREATE INDEX idx_jobs_status       ON jobs(status);
CREATE INDEX idx_jobs_session      ON jobs(session_id, chunk_index);
CREATE INDEX idx_jobs_completed_at ON jobs(completed_at);

-- One record per (session, chunk index).
CREATE TABLE segments (
    session_id  TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    file_path   TEXT NOT NULL,
    duration    REAL NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending',
    error       TEXT,
    updated_at  TEXT NOT NULL,
    PRIMARY KEY (session_id, chunk_index)
);
"#;

/// V2: session lifecycle state, shared by every process on one database.
const V2_SESSIONS: &str = r#"
CREATE TABLE sessions (
    session_id TEXT PRIMARY KEY,
    state      TEXT NOT NULL DEFAULT 'recording',
    updated_at TEXT NOT NULL
);

CREATE INDEX idx_sessions_state ON sessions(state);
"#;

/// `(version, sql)`, ascending.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_INITIAL), (2, V2_SESSIONS)];

/// Highest applied version, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<i64> {
    ensure_tracking_table(conn)?;
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Apply every migration newer than [`schema_version`], each in its own
/// transaction.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current = schema_version(conn)?;

    for &(version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        tracing::debug!("Applying migration V{version}");

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;
        tx.execute_batch(sql)
            .and_then(|_| {
                tx.execute(
                    "INSERT INTO schema_migrations (version) VALUES (?1)",
                    [version],
                )
            })
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;
        tx.commit().map_err(|e| Error::database(e.to_string()))?;
    }

    Ok(())
}

fn ensure_tracking_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn rerun_is_a_no_op() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 0);
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let latest = MIGRATIONS.last().map(|(v, _)| *v).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), latest);
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, MIGRATIONS.len() as i64);
    }

    #[test]
    fn creates_queue_segment_and_session_tables() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for t in ["jobs", "segments", "sessions", "schema_migrations"] {
            let exists: bool = conn
                .query_row(
                    "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
                    [t],
                    |row| row.get(0),
                )
                .unwrap();
            assert!(exists, "table {t} should exist");
        }
    }

    #[test]
    fn v1_database_is_upgraded() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_tracking_table(&conn).unwrap();
        conn.execute_batch(V1_INITIAL).unwrap();
        conn.execute("INSERT INTO schema_migrations (version) VALUES (1)", [])
            .unwrap();

        run_migrations(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), 2);
        conn.execute(
            "INSERT INTO sessions (session_id, updated_at) VALUES ('abc123', 'now')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn segment_key_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let insert = "INSERT INTO segments (session_id, chunk_index, file_path, duration, updated_at)
                      VALUES ('abc123', 0, 'segment-0.ts', 5.0, '2024-01-01T00:00:00.000Z')";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
