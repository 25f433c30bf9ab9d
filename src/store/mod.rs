//! Persistence of per-song analysis results
//!
//! A single SQLite table keyed by song id holds the detected BPM, the
//! manually tapped BPM and the time of the last completed analysis.

mod schema;

pub use schema::SCHEMA_VERSION;

use crate::error::StoreError;
use crate::model::{SongAnalysis, SongId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed store for [`SongAnalysis`] rows
///
/// The connection sits behind a mutex so the store can be shared between
/// analysis workers.
pub struct SongAnalysisStore {
    conn: Mutex<Connection>,
}

impl SongAnalysisStore {
    /// Open (or create) a database file
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        log::debug!("Opening analysis database {:?}", path);
        Self::from_connection(Connection::open(path)?)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, StoreError> {
        schema::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Store the result of an automatic analysis, keeping any manual BPM
    pub fn record_bpm(&self, song_id: SongId, bpm: Option<f64>) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn()?.execute(
            "INSERT INTO song_analysis (song_id, bpm, analyzed_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(song_id) DO UPDATE
             SET bpm = excluded.bpm, analyzed_at = excluded.analyzed_at",
            params![song_id.0, bpm, now],
        )?;
        log::debug!("Stored BPM {:?} for song {}", bpm, song_id);
        Ok(())
    }

    /// Store (or clear) the tapped reference tempo, keeping any detected BPM
    pub fn set_manual_bpm(
        &self,
        song_id: SongId,
        manual_bpm: Option<f64>,
    ) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO song_analysis (song_id, manual_bpm) VALUES (?1, ?2)
             ON CONFLICT(song_id) DO UPDATE SET manual_bpm = excluded.manual_bpm",
            params![song_id.0, manual_bpm],
        )?;
        log::debug!("Stored manual BPM {:?} for song {}", manual_bpm, song_id);
        Ok(())
    }

    /// Full row for a song
    pub fn get(&self, song_id: SongId) -> Result<Option<SongAnalysis>, StoreError> {
        let row = self
            .conn()?
            .query_row(
                "SELECT song_id, bpm, manual_bpm, analyzed_at FROM song_analysis
                 WHERE song_id = ?1",
                params![song_id.0],
                read_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Detected BPM, if any
    pub fn bpm(&self, song_id: SongId) -> Result<Option<f64>, StoreError> {
        Ok(self.get(song_id)?.and_then(|a| a.bpm))
    }

    /// Manual BPM, if any
    pub fn manual_bpm(&self, song_id: SongId) -> Result<Option<f64>, StoreError> {
        Ok(self.get(song_id)?.and_then(|a| a.manual_bpm))
    }

    /// Whether an automatic analysis has completed for the song
    pub fn is_analyzed(&self, song_id: SongId) -> Result<bool, StoreError> {
        Ok(self.get(song_id)?.map(|a| a.is_analyzed()).unwrap_or(false))
    }

    /// All rows ordered by song id
    pub fn all(&self) -> Result<Vec<SongAnalysis>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT song_id, bpm, manual_bpm, analyzed_at FROM song_analysis ORDER BY song_id",
        )?;
        let rows = stmt
            .query_map([], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete one song's row; returns whether it existed
    pub fn delete(&self, song_id: SongId) -> Result<bool, StoreError> {
        let deleted = self.conn()?.execute(
            "DELETE FROM song_analysis WHERE song_id = ?1",
            params![song_id.0],
        )?;
        Ok(deleted > 0)
    }

    /// Delete every row; returns how many were removed
    pub fn delete_all(&self) -> Result<usize, StoreError> {
        let deleted = self.conn()?.execute("DELETE FROM song_analysis", [])?;
        log::info!("Deleted {} analysis rows", deleted);
        Ok(deleted)
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<SongAnalysis> {
    let analyzed_at: Option<String> = row.get(3)?;
    Ok(SongAnalysis {
        song_id: SongId(row.get(0)?),
        bpm: row.get(1)?,
        manual_bpm: row.get(2)?,
        analyzed_at: analyzed_at.as_deref().and_then(parse_timestamp),
    })
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(text) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(e) => {
            log::warn!("Ignoring malformed analyzed_at {:?}: {}", text, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_and_read() {
        let store = SongAnalysisStore::open_in_memory().unwrap();
        let id = SongId(42);

        assert!(store.get(id).unwrap().is_none());
        assert!(!store.is_analyzed(id).unwrap());

        store.record_bpm(id, Some(128.0)).unwrap();

        let row = store.get(id).unwrap().unwrap();
        assert_eq!(row.bpm, Some(128.0));
        assert_eq!(row.manual_bpm, None);
        assert!(row.analyzed_at.is_some());
        assert!(store.is_analyzed(id).unwrap());
    }

    #[test]
    fn test_upserts_preserve_other_column() {
        let store = SongAnalysisStore::open_in_memory().unwrap();
        let id = SongId(1);

        store.set_manual_bpm(id, Some(87.5)).unwrap();
        assert!(!store.is_analyzed(id).unwrap());

        store.record_bpm(id, Some(175.0)).unwrap();
        assert_eq!(store.manual_bpm(id).unwrap(), Some(87.5));

        store.set_manual_bpm(id, Some(88.0)).unwrap();
        assert_eq!(store.bpm(id).unwrap(), Some(175.0));
        assert_eq!(store.manual_bpm(id).unwrap(), Some(88.0));
    }

    #[test]
    fn test_missing_bpm_still_counts_as_analyzed() {
        let store = SongAnalysisStore::open_in_memory().unwrap();
        store.record_bpm(SongId(3), None).unwrap();

        assert!(store.is_analyzed(SongId(3)).unwrap());
        assert_eq!(store.bpm(SongId(3)).unwrap(), None);
    }

    #[test]
    fn test_delete_and_delete_all() {
        let store = SongAnalysisStore::open_in_memory().unwrap();
        for id in 1..=3 {
            store.record_bpm(SongId(id), Some(100.0 + id as f64)).unwrap();
        }

        assert!(store.delete(SongId(2)).unwrap());
        assert!(!store.delete(SongId(2)).unwrap());

        let ids: Vec<_> = store.all().unwrap().iter().map(|a| a.song_id).collect();
        assert_eq!(ids, vec![SongId(1), SongId(3)]);

        assert_eq!(store.delete_all().unwrap(), 2);
        assert!(store.all().unwrap().is_empty());
    }

    #[test]
    fn test_file_database_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db").join("analysis.sqlite");

        {
            let store = SongAnalysisStore::open(&path).unwrap();
            store.record_bpm(SongId(9), Some(140.0)).unwrap();
        }

        let reopened = SongAnalysisStore::open(&path).unwrap();
        assert_eq!(reopened.bpm(SongId(9)).unwrap(), Some(140.0));
    }
}
