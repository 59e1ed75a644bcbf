//! Schema migrations shared by every SQLite database in the workspace.
//!
//! Each database (remote store, client cache, catalog) declares its own
//! ordered [`Migration`] list. Applied versions are tracked in a
//! `_migrations` table inside that database.

use crate::Error;
use tokio_rusqlite::{Connection, params};

/// One schema step. Versions must be strictly increasing within a list.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub sql: &'static str,
}

impl Migration {
    pub const fn new(version: i64, sql: &'static str) -> Self {
        Self { version, sql }
    }
}

/// Pragmas applied to every connection before migrating.
pub const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;";

/// Apply pragmas, then every migration newer than the recorded version.
///
/// Each migration runs in its own transaction together with its bookkeeping
/// row, so a failed step leaves the recorded version untouched.
pub async fn run(conn: &Connection, migrations: &'static [Migration]) -> Result<(), Error> {
    conn.call(move |conn| -> Result<(), Error> {
        conn.execute_batch(PRAGMAS)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current: i64 =
            conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;

        let mut last = current;
        for migration in migrations.iter().filter(|m| m.version > current) {
            if migration.version <= last {
                return Err(Error::MigrationFailed(format!("version {} is out of order", migration.version)));
            }

            let tx = conn.transaction()?;
            tx.execute_batch(migration.sql)
                .map_err(|e| Error::MigrationFailed(format!("version {}: {e}", migration.version)))?;
            tx.execute(
                "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                params![migration.version, chrono::Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;

            tracing::debug!(version = migration.version, "applied migration");
            last = migration.version;
        }

        Ok(())
    })
    .await
    .map_err(Error::from)
}
