use rusqlite::Connection;

use crate::error::Result;

/// Initialise the key-value schema in `conn`.
///
/// Creates the `kv` table (idempotent). Values are whole JSON documents; there
/// is no per-entry addressing.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv (
            key         TEXT    NOT NULL PRIMARY KEY,
            value       TEXT    NOT NULL,   -- JSON document
            updated_at  TEXT    NOT NULL    -- ISO-8601
        ) STRICT;
        ",
    )?;
    Ok(())
}
