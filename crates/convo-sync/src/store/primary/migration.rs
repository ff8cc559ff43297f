//! Versioned schema migrations for the primary database

use rusqlite::{Connection, OptionalExtension, Result};
use tracing::{error, info, warn};

/// Applies pending migrations and records each one in `schema_version`.
pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationManager<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    pub fn initialize_database(&mut self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        let current_version = self.get_current_version()?;
        info!("Current primary schema version: {}", current_version);

        self.apply_migrations(current_version)
    }

    fn apply_migrations(&mut self, current_version: i32) -> Result<()> {
        for (version, migration_sql) in get_migrations() {
            if version <= current_version {
                continue;
            }
            info!("Applying migration {}...", version);

            let tx = self.conn.transaction()?;
            if let Err(e) = tx.execute_batch(migration_sql) {
                error!("Failed to apply migration {}: {}", version, e);
                return Err(e);
            }
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
            tx.commit()?;

            info!("Migration {} applied successfully", version);
        }
        Ok(())
    }

    pub fn get_current_version(&self) -> Result<i32> {
        self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
    }

    pub fn has_migration_applied(&self, version: i32) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM schema_version WHERE version = ?1",
                [version],
                |_| Ok(1),
            )
            .optional()
            .map(|found| found.is_some())
    }
}

fn get_migrations() -> Vec<(i32, &'static str)> {
    vec![
        (1, include_str!("migrations/001_sessions.sql")),
        (2, include_str!("migrations/002_activities.sql")),
        (3, include_str!("migrations/003_mirror_ledger.sql")),
    ]
}

/// Row counts per table, for the maintenance CLI.
pub fn table_counts(conn: &Connection) -> Result<Vec<(&'static str, i64)>> {
    const TABLES: [&str; 5] = ["chat_sessions", "messages", "activities", "mirror_links", "mirror_outbox"];

    let mut counts = Vec::with_capacity(TABLES.len());
    for table in TABLES {
        let count = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .or_else(|e| {
                warn!("Failed to get count from table {}: {}", table, e);
                Ok::<i64, rusqlite::Error>(0)
            })?;
        counts.push((table, count));
    }
    Ok(counts)
}
