mod schema;
pub mod rejections;
pub mod segments;
pub mod videos;
pub mod words;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub use rejections::RejectionRecord;
pub use schema::{MIGRATIONS, SCHEMA};

/// SQLite-backed store for videos, segments and words.
///
/// Each harvest worker opens its own `Database`; WAL mode and a busy timeout
/// let concurrent workers share the file.
pub struct Database {
    pub(crate) conn: Connection,
}

/// Dataset totals for the `stats` command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetStats {
    pub videos_total: i64,
    pub videos_completed: i64,
    pub videos_rejected: i64,
    pub segments: i64,
    pub words: i64,
    pub identities: i64,
    pub segment_seconds: f64,
}

impl Database {
    pub fn open(path: &Path, busy_timeout_ms: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening database {}", path.display()))?;
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn })
    }

    pub fn initialize(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        self.run_migrations()?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        for migration in MIGRATIONS {
            let _ = self.conn.execute(migration, []);
        }
        Ok(())
    }

    /// Run `f` inside one transaction, committing only if it succeeds.
    pub fn transaction<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }

    pub fn stats(&self) -> Result<DatasetStats> {
        let (videos_total, videos_completed, videos_rejected) = self.conn.query_row(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(status = 'completed'), 0),
                   COALESCE(SUM(status = 'rejected'), 0)
            FROM videos
            "#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let (segments, segment_ms) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(end_ms - start_ms), 0) FROM segments",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;

        let words = self
            .conn
            .query_row("SELECT COUNT(*) FROM words", [], |row| row.get(0))?;

        let identities = self.conn.query_row(
            "SELECT COALESCE(SUM(num_people), 0) FROM videos WHERE status = 'completed'",
            [],
            |row| row.get(0),
        )?;

        Ok(DatasetStats {
            videos_total,
            videos_completed,
            videos_rejected,
            segments,
            words,
            identities,
            segment_seconds: segment_ms as f64 / 1000.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_on_disk_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("harvest.db");

        let db = Database::open(&path, 1_000).unwrap();
        db.initialize().unwrap();
        let id = db.create_video("https://example.com/v/1").unwrap();
        db.mark_video_rejected(id, "video has no transcript").unwrap();
        drop(db);

        let db = Database::open(&path, 1_000).unwrap();
        db.initialize().unwrap();
        assert!(db.video_exists("https://example.com/v/1").unwrap());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        let result: Result<()> = db.transaction(|db| {
            db.create_video("https://example.com/v/2")?;
            anyhow::bail!("stage failed")
        });
        assert!(result.is_err());
        assert!(db.get_video_by_url("https://example.com/v/2").unwrap().is_none());
    }

    #[test]
    fn test_stats_on_empty_database() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        assert_eq!(db.stats().unwrap(), DatasetStats::default());
    }
}
