use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

use crate::{
    db::init_db,
    error::Result,
    kv::{encode_checked, KeyValueStore, Modify, StoreChange},
};

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// How long a connection waits for another process's write lock before
/// failing with `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed [`KeyValueStore`].
///
/// Wraps a single connection in a `Mutex`; `get`, `set` and `remove` are one
/// statement each. `modify` runs inside a `BEGIN IMMEDIATE` transaction, so
/// it also excludes writers on other connections to the same file (the
/// daemon and one-shot CLI commands).
pub struct SqliteStore {
    name: String,
    max_item_bytes: usize,
    db: Mutex<Connection>,
    changes: broadcast::Sender<StoreChange>,
}

impl SqliteStore {
    /// Wrap an already-open connection, initialising the schema if needed.
    pub fn new(name: &str, conn: Connection, max_item_bytes: usize) -> Result<Self> {
        init_db(&conn)?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            name: name.to_string(),
            max_item_bytes,
            db: Mutex::new(conn),
            changes,
        })
    }

    /// Open (or create) the database file at `path`, creating parent dirs.
    pub fn open(name: &str, path: &str, max_item_bytes: usize) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        info!(store = name, path, "opening SQLite store");
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::new(name, conn, max_item_bytes)
    }

    fn notify(&self, key: &str) {
        let _ = self.changes.send(StoreChange {
            store: self.name.clone(),
            key: key.to_string(),
        });
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self), fields(store = %self.name))]
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let raw: Option<String> = {
            let db = self.db.lock().expect("sqlite store poisoned");
            read_raw(&db, key)?
        };
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, value), fields(store = %self.name))]
    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let encoded = encode_checked(key, &value, self.max_item_bytes)?;
        {
            let db = self.db.lock().expect("sqlite store poisoned");
            write_raw(&db, key, &encoded)?;
        }
        debug!(bytes = encoded.len(), "value written");
        self.notify(key);
        Ok(())
    }

    #[instrument(skip(self, f), fields(store = %self.name))]
    async fn modify<'a>(&self, key: &str, f: Modify<'a>) -> Result<bool> {
        let written = {
            let mut db = self.db.lock().expect("sqlite store poisoned");
            // IMMEDIATE takes the write lock before the read.
            let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = match read_raw(&tx, key)? {
                Some(s) => Some(serde_json::from_str(&s)?),
                None => None,
            };
            match f(current)? {
                Some(next) => {
                    let encoded = encode_checked(key, &next, self.max_item_bytes)?;
                    write_raw(&tx, key, &encoded)?;
                    tx.commit()?;
                    debug!(bytes = encoded.len(), "value modified");
                    true
                }
                // dropping the transaction rolls it back
                None => false,
            }
        };
        if written {
            self.notify(key);
        }
        Ok(written)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let n = {
            let db = self.db.lock().expect("sqlite store poisoned");
            db.execute("DELETE FROM kv WHERE key = ?1", [key])?
        };
        if n > 0 {
            self.notify(key);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

fn read_raw(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
        .optional()?)
}

fn write_raw(conn: &Connection, key: &str, encoded: &str) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                        updated_at = excluded.updated_at",
        rusqlite::params![key, encoded, now],
    )?;
    Ok(())
}
