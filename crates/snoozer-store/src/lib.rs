//! `snoozer-store`: key-value persistence for pending snoozes.
//!
//! # Overview
//!
//! Two stores back the scheduler:
//!
//! | Store    | Lifetime                     | Keys                                |
//! |----------|------------------------------|-------------------------------------|
//! | durable  | survives restarts            | `snoozedTabs`                       |
//! | session  | wiped when the session ends  | `undoStack`, `wakeupThreshold`      |
//!
//! Both implement [`kv::KeyValueStore`]. Values are JSON, written whole, and
//! every write is checked against a per-item quota before it reaches the
//! backend. The pending set lives under a single key, so replacing it is
//! atomic without any cross-key transaction.
//!
//! [`queue::PersistentQueue`] is the only writer of the pending set and the
//! undo stack. Its read-modify-write cycles go through
//! [`kv::KeyValueStore::modify`], which the SQLite store runs as one
//! `BEGIN IMMEDIATE` transaction, so separate processes sharing a file do
//! not lose each other's writes.

pub mod db;
pub mod error;
pub mod kv;
pub mod queue;
pub mod sqlite;

pub use error::{Result, StoreError};
pub use kv::{KeyValueStore, MemoryStore, Modify, StoreChange};
pub use queue::{PendingSet, PersistentQueue};
pub use sqlite::SqliteStore;
