//! r2d2 pool over SQLite.

use std::sync::atomic::{AtomicU64, Ordering};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use tl_core::{Error, Result};

use crate::migrations;

pub type DbPool = Pool<SqliteConnectionManager>;

pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Enough for the default worker count plus the purge task and callers.
const FILE_POOL_SIZE: u32 = 8;
const MEMORY_POOL_SIZE: u32 = 4;

/// Milliseconds a writer waits for another writer before giving up.
const BUSY_TIMEOUT_MS: u32 = 5000;

/// Open (or create) the job database at `db_path` and bring its schema up
/// to date.
///
/// Every connection runs in WAL mode with a busy timeout, so workers
/// claiming jobs concurrently queue up on the write lock.
pub fn init_pool(db_path: &str) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};"
        ))
    });
    build(manager, FILE_POOL_SIZE)
}

/// A private in-memory database for tests.
///
/// Connections of one pool share a uniquely named shared-cache database;
/// separate pools never see each other. Shared-cache locks fail fast
/// instead of waiting, so concurrent writers need [`init_pool`].
pub fn init_memory_pool() -> Result<DbPool> {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    let manager =
        SqliteConnectionManager::file(format!("file:tl_memdb_{n}?mode=memory&cache=shared"));
    build(manager, MEMORY_POOL_SIZE)
}

pub fn get_conn(pool: &DbPool) -> Result<PooledConnection> {
    pool.get()
        .map_err(|e| Error::database(format!("Failed to get connection from pool: {e}")))
}

fn build(manager: SqliteConnectionManager, max_size: u32) -> Result<DbPool> {
    let pool = Pool::builder()
        .max_size(max_size)
        .build(manager)
        .map_err(|e| Error::database(format!("Failed to create connection pool: {e}")))?;

    migrations::run_migrations(&*get_conn(&pool)?)?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pragma<T: rusqlite::types::FromSql>(conn: &PooledConnection, name: &str) -> T {
        conn.query_row(&format!("PRAGMA {name}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn memory_pool_is_migrated() {
        let pool = init_memory_pool().unwrap();
        assert_eq!(pool.max_size(), MEMORY_POOL_SIZE);

        let conn = get_conn(&pool).unwrap();
        assert!(migrations::schema_version(&conn).unwrap() >= 1);
    }

    #[test]
    fn file_pool_waits_on_locks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let pool = init_pool(&path.to_string_lossy()).unwrap();
        let conn = get_conn(&pool).unwrap();

        let mode: String = pragma(&conn, "journal_mode");
        assert_eq!(mode.to_lowercase(), "wal");
        let timeout: i64 = pragma(&conn, "busy_timeout");
        assert_eq!(timeout, i64::from(BUSY_TIMEOUT_MS));
        assert!(path.exists());
    }

    #[test]
    fn reopening_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db").to_string_lossy().into_owned();
        {
            let pool = init_pool(&path).unwrap();
            get_conn(&pool)
                .unwrap()
                .execute(
                    "INSERT INTO jobs (id, session_id, chunk_index, created_at)
                     VALUES ('j1', 'abc123', 0, '2024-01-01T00:00:00.000Z')",
                    [],
                )
                .unwrap();
        }
        let pool = init_pool(&path).unwrap();
        let count: i64 = get_conn(&pool)
            .unwrap()
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn memory_pools_are_isolated() {
        let a = init_memory_pool().unwrap();
        let b = init_memory_pool().unwrap();
        get_conn(&a)
            .unwrap()
            .execute_batch("CREATE TABLE only_in_a (x INTEGER)")
            .unwrap();

        let count: i64 = get_conn(&b)
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name='only_in_a'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 0);
    }
}
