//! Durable intent store – a SQLite file holding `path -> action` pairs per named collection.

use crate::error::StoreError;
use crate::file_op::{Action, FileChangeIntent};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Collection the daemon keeps its queue in.
pub const INTENT_COLLECTION: &str = "files_to_update";

const BUSY_TIMEOUT: Duration = Duration::from_secs(120);

/// Handle on the local store. All methods are blocking; async callers go through
/// `tokio::task::spawn_blocking`.
#[derive(Debug)]
pub struct IntentStore {
    conn: Mutex<Connection>,
    collection: String,
}

impl IntentStore {
    /// Open (creating if needed) the store file and make sure `collection` exists.
    pub fn open<P: AsRef<Path>>(path: P, collection: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, collection)
    }

    pub fn open_in_memory(collection: &str) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, collection)
    }

    fn from_connection(conn: Connection, collection: &str) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self {
            conn: Mutex::new(conn),
            collection: collection.to_string(),
        };
        store.ensure_collection(collection)?;
        Ok(store)
    }

    /// Create the table backing `name` if it does not exist yet.
    pub fn ensure_collection(&self, name: &str) -> Result<(), StoreError> {
        validate_collection(name)?;
        self.lock().execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {name} (
                path   TEXT PRIMARY KEY NOT NULL,
                action TEXT NOT NULL
            );"
        ))?;
        Ok(())
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Raw action token recorded for `path`, if any.
    pub fn get(&self, path: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock();
        let value = conn
            .query_row(
                &format!("SELECT action FROM {} WHERE path = ?1", self.collection),
                params![path],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Write `path -> action`, replacing any existing record.
    pub fn put(&self, path: &str, action: Action) -> Result<(), StoreError> {
        self.lock().execute(
            &format!(
                "INSERT INTO {} (path, action) VALUES (?1, ?2)
                 ON CONFLICT(path) DO UPDATE SET action = excluded.action",
                self.collection
            ),
            params![path, action.as_str()],
        )?;
        Ok(())
    }

    pub fn delete(&self, path: &str) -> Result<bool, StoreError> {
        let n = self.lock().execute(
            &format!("DELETE FROM {} WHERE path = ?1", self.collection),
            params![path],
        )?;
        Ok(n > 0)
    }

    /// Visit every record in path order.
    pub fn for_each<F>(&self, mut f: F) -> Result<(), StoreError>
    where
        F: FnMut(&str, &str),
    {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT path, action FROM {} ORDER BY path",
            self.collection
        ))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let path: String = row.get(0)?;
            let action: String = row.get(1)?;
            f(&path, &action);
        }
        Ok(())
    }

    /// All records as `(path, raw action)` pairs.
    pub fn entries(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut out = Vec::new();
        self.for_each(|path, action| out.push((path.to_string(), action.to_string())))?;
        Ok(out)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let n: i64 = self.lock().query_row(
            &format!("SELECT COUNT(*) FROM {}", self.collection),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Merge a snapshot of intents in one transaction. Paths that already have a record are
    /// left untouched; the oldest pending action wins until reconciliation clears it.
    /// Returns the number of records written.
    pub fn merge_absent(&self, intents: &[FileChangeIntent]) -> Result<usize, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut exists = tx.prepare(&format!(
                "SELECT 1 FROM {} WHERE path = ?1",
                self.collection
            ))?;
            let mut insert = tx.prepare(&format!(
                "INSERT INTO {} (path, action) VALUES (?1, ?2)",
                self.collection
            ))?;
            for intent in intents {
                let key = path_key(&intent.path);
                if exists.exists(params![key])? {
                    continue;
                }
                insert.execute(params![key, intent.action.as_str()])?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Release the handle. Dropping has the same effect; this surfaces close errors.
    pub fn close(self) -> Result<(), StoreError> {
        let conn = self.conn.into_inner().unwrap_or_else(PoisonError::into_inner);
        conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Key a path is stored under.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn validate_collection(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidCollection(name.to_string()))
    }
}
