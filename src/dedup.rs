//! Persisted set of already-posted candidate ids.
//!
//! One SQLite file per deployment with a single `posted(name)` table. The
//! file is created only by [`DedupStore::provision`]; a run against a
//! missing file works with an unavailable store that contains nothing and
//! refuses inserts.

use std::path::{Path, PathBuf};

use common::Error;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info, warn};

const CREATE_POSTED: &str = "CREATE TABLE IF NOT EXISTS posted (name TEXT PRIMARY KEY)";

fn store_err(e: rusqlite::Error) -> Error {
    Error::Store(e.to_string())
}

#[derive(Debug)]
pub struct DedupStore {
    path: PathBuf,
    conn: Option<Connection>,
}

impl DedupStore {
    /// Create the store file and table if needed.
    pub fn provision(path: &Path) -> Result<Self, Error> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(store_err)?;
        conn.execute(CREATE_POSTED, []).map_err(store_err)?;

        let existing: Option<i64> = conn
            .query_row("SELECT COUNT(*) FROM posted", [], |row| row.get(0))
            .optional()
            .map_err(store_err)?;
        info!(
            "Dedup store ready at {} ({} ids recorded)",
            path.display(),
            existing.unwrap_or(0)
        );

        Ok(Self {
            path: path.to_path_buf(),
            conn: Some(conn),
        })
    }

    /// Open an existing store; never creates the file.
    pub fn open(path: &Path) -> Self {
        let conn = if !path.exists() {
            warn!(
                "Dedup store {} does not exist; run with --init-store to provision it",
                path.display()
            );
            None
        } else {
            match Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)
                .and_then(|conn| conn.execute(CREATE_POSTED, []).map(|_| conn))
            {
                Ok(conn) => Some(conn),
                Err(e) => {
                    warn!("Dedup store {} unusable: {}", path.display(), e);
                    None
                }
            }
        };

        Self {
            path: path.to_path_buf(),
            conn,
        }
    }

    pub fn is_available(&self) -> bool {
        self.conn.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Exact-match membership; `false` when the store is unavailable.
    pub fn contains(&self, id: &str) -> bool {
        let Some(conn) = &self.conn else {
            return false;
        };
        let found = conn
            .prepare_cached("SELECT 1 FROM posted WHERE name = ?1")
            .and_then(|mut stmt| stmt.exists([id]));
        match found {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Dedup lookup for {} failed: {}", id, e);
                false
            }
        }
    }

    /// Insert ids in one transaction; returns how many were new.
    pub fn insert_all(&mut self, ids: &[String]) -> Result<usize, Error> {
        let conn = self.conn.as_mut().ok_or_else(|| {
            Error::Store(format!("{} is not provisioned", self.path.display()))
        })?;

        let tx = conn.transaction().map_err(store_err)?;
        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare("INSERT OR IGNORE INTO posted (name) VALUES (?1)")
                .map_err(store_err)?;
            for id in ids {
                inserted += stmt.execute([id]).map_err(store_err)?;
            }
        }
        tx.commit().map_err(store_err)?;

        debug!("Committed {} ids ({} new) to dedup store", ids.len(), inserted);
        Ok(inserted)
    }
}
