//! Key-value metadata database.
//!
//! Holds repo-cache bookkeeping: which recipe repos are added, where their
//! clones live, and when they were last refreshed. Losing this file costs
//! only that bookkeeping; store and profile state live on the filesystem.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("recipe repo {0:?} already added")]
    RepoExists(String),

    #[error("recipe repo {0:?} not found")]
    RepoMissing(String),
}

/// A registered recipe repo.
#[derive(Debug, Clone)]
pub struct RepoEntry {
    pub name: String,
    pub url: String,
    pub path: PathBuf,
    /// Unix seconds of the last refresh, if any.
    pub last_refresh: Option<i64>,
}

pub struct MetaDb {
    conn: Connection,
}

impl MetaDb {
    pub fn open_at(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS repos (
                position INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT UNIQUE NOT NULL,
                url TEXT NOT NULL,
                path TEXT NOT NULL,
                refreshed INTEGER
            );
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', '1');",
        )?;

        Ok(Self { conn })
    }

    pub fn add_repo(&self, name: &str, url: &str, path: &Path) -> Result<(), DbError> {
        let result = self.conn.execute(
            "INSERT INTO repos (name, url, path) VALUES (?1, ?2, ?3)",
            params![name, url, path.to_string_lossy()],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(DbError::RepoExists(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Registered repos in insertion order.
    pub fn list_repos(&self) -> Result<Vec<RepoEntry>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, url, path, refreshed FROM repos ORDER BY position")?;
        let rows = stmt.query_map([], |row| {
            Ok(RepoEntry {
                name: row.get(0)?,
                url: row.get(1)?,
                path: PathBuf::from(row.get::<_, String>(2)?),
                last_refresh: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn get_repo(&self, name: &str) -> Result<Option<RepoEntry>, DbError> {
        let entry = self
            .conn
            .query_row(
                "SELECT name, url, path, refreshed FROM repos WHERE name = ?1",
                params![name],
                |row| {
                    Ok(RepoEntry {
                        name: row.get(0)?,
                        url: row.get(1)?,
                        path: PathBuf::from(row.get::<_, String>(2)?),
                        last_refresh: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    pub fn touch_refresh(&self, name: &str, unix_seconds: i64) -> Result<(), DbError> {
        let changed = self.conn.execute(
            "UPDATE repos SET refreshed = ?2 WHERE name = ?1",
            params![name, unix_seconds],
        )?;
        if changed == 0 {
            return Err(DbError::RepoMissing(name.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_add_and_list_preserves_order() {
        let dir = tempdir().unwrap();
        let db = MetaDb::open_at(&dir.path().join("meta.db")).unwrap();

        db.add_repo("zeta", "https://example.com/zeta", Path::new("/r/zeta"))
            .unwrap();
        db.add_repo("alpha", "https://example.com/alpha", Path::new("/r/alpha"))
            .unwrap();

        let names: Vec<String> = db.list_repos().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"], "insertion order, not sorted");
    }

    #[test]
    fn test_duplicate_repo_rejected() {
        let dir = tempdir().unwrap();
        let db = MetaDb::open_at(&dir.path().join("meta.db")).unwrap();

        db.add_repo("core", "https://example.com/a", Path::new("/r/a"))
            .unwrap();
        let err = db
            .add_repo("core", "https://example.com/b", Path::new("/r/b"))
            .unwrap_err();
        assert!(matches!(err, DbError::RepoExists(_)));
    }

    #[test]
    fn test_touch_refresh() {
        let dir = tempdir().unwrap();
        let db = MetaDb::open_at(&dir.path().join("meta.db")).unwrap();

        db.add_repo("core", "https://example.com/a", Path::new("/r/a"))
            .unwrap();
        db.touch_refresh("core", 1234567).unwrap();
        let entry = db.get_repo("core").unwrap().unwrap();
        assert_eq!(entry.last_refresh, Some(1234567));

        assert!(matches!(
            db.touch_refresh("absent", 1),
            Err(DbError::RepoMissing(_))
        ));
    }
}
