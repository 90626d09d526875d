//! Durable key-value storage behind the tag cache.
//!
//! [`SqliteStore`] keeps one `tags` table of `(key, value)` rows. The trait
//! seam lets tests inject failing backends and lets callers run fully in
//! memory with [`MemoryStore`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

/// Failure reported by a [`KvStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The backend's contents are unreadable.
    #[error("store corrupt: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase
                ) =>
            {
                StoreError::Corrupt(err.to_string())
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// A string-keyed byte store.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Discard the backing data and start from an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend cannot be recreated.
    fn repair(&self) -> Result<(), StoreError>;
}

/// SQLite-backed [`KvStore`].
///
/// # Examples
///
/// ```
/// use atlas_repomap::store::{KvStore, SqliteStore};
///
/// let store = SqliteStore::in_memory().unwrap();
/// store.put("src/a.py", b"[]").unwrap();
/// assert_eq!(store.get("src/a.py").unwrap().as_deref(), Some(&b"[]"[..]));
/// assert_eq!(store.len().unwrap(), 1);
/// ```
pub struct SqliteStore {
    /// `None` for in-memory stores.
    path: Option<PathBuf>,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the directory or database
    /// cannot be created, and [`StoreError::Corrupt`] if the file exists but
    /// is not a usable database.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::path::Path;
    /// use atlas_repomap::store::SqliteStore;
    ///
    /// let store = SqliteStore::open(Path::new(".atlas.cache/tags.db")).unwrap();
    /// ```
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("failed to create cache directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            conn: Mutex::new(conn),
        })
    }

    /// Delete whatever is at `path` and open a fresh, empty store there.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the old file cannot be removed
    /// or the new database cannot be created.
    pub fn recreate(path: &Path) -> Result<Self, StoreError> {
        discard_file(path)?;
        Self::open(path)
    }

    /// [`SqliteStore::open`], recreating the database once if it is corrupt.
    ///
    /// # Errors
    ///
    /// Returns the recreate error when the fresh database cannot be made
    /// either, or [`StoreError::Unavailable`] from the first open.
    pub fn open_or_recreate(path: &Path) -> Result<Self, StoreError> {
        match Self::open(path) {
            Err(StoreError::Corrupt(reason)) => {
                tracing::warn!(
                    path = %path.display(),
                    reason = %reason,
                    "tag cache database is corrupt, recreating"
                );
                Self::recreate(path)
            }
            other => other,
        }
    }

    /// Create an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if SQLite cannot allocate it.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            path: None,
            conn: Mutex::new(conn),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".into()))
    }
}

fn discard_file(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::Unavailable(format!(
            "failed to remove cache file: {e}"
        ))),
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tags (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL
        );",
    )?;
    Ok(())
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.lock()?;
        let value = conn
            .query_row("SELECT value FROM tags WHERE key = ?1", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO tags (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM tags WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM tags", [])?;
        Ok(())
    }

    fn len(&self) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn repair(&self) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        match &self.path {
            None => {
                *conn = Connection::open_in_memory()?;
            }
            Some(path) => {
                // release the file handle before deleting it
                *conn = Connection::open_in_memory()?;
                discard_file(path)?;
                *conn = Connection::open(path)?;
            }
        }
        init_schema(&conn)
    }
}

/// Process-local [`KvStore`], used when no cache directory is wanted.
///
/// # Examples
///
/// ```
/// use atlas_repomap::store::{KvStore, MemoryStore};
///
/// let store = MemoryStore::default();
/// store.put("k", b"v").unwrap();
/// store.clear().unwrap();
/// assert!(store.is_empty().unwrap());
/// ```
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<u8>>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".into()))
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.lock()?.clear();
        Ok(())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.len())
    }

    fn repair(&self) -> Result<(), StoreError> {
        self.clear()
    }
}
