//! Schema migrations, tracked with `PRAGMA user_version`

use crate::error::StoreError;
use rusqlite::Connection;

/// Ordered migrations; entry `i` upgrades version `i` to `i + 1`
const MIGRATIONS: &[&str] = &[
    // v1: song analysis table
    "CREATE TABLE IF NOT EXISTS song_analysis (
        song_id INTEGER PRIMARY KEY NOT NULL,
        bpm REAL,
        manual_bpm REAL
    );",
    // v2: completion timestamp so silent songs are not re-analyzed forever
    "ALTER TABLE song_analysis ADD COLUMN analyzed_at TEXT;
     UPDATE song_analysis SET analyzed_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
        WHERE bpm IS NOT NULL;",
];

/// Latest schema version
pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

/// Bring the database up to `SCHEMA_VERSION`
pub fn migrate(conn: &mut Connection) -> Result<(), StoreError> {
    let current: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if current > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }

    for (index, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = index as i64 + 1;
        log::debug!("Migrating analysis database to schema v{}", version);

        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }

    if current < SCHEMA_VERSION {
        log::info!(
            "Analysis database migrated from v{} to v{}",
            current,
            SCHEMA_VERSION
        );
    }

    Ok(())
}
