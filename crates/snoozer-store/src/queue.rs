use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use snoozer_core::config::{KEY_SNOOZED_TABS, KEY_UNDO_STACK, MAX_UNDO_DEPTH};
use snoozer_core::{SnoozeEntry, UndoItem};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::kv::KeyValueStore;

/// Result of reading the pending array.
#[derive(Debug, Default)]
pub struct PendingSet {
    pub entries: Vec<SnoozeEntry>,
    /// Elements that were null or not a valid entry and were skipped.
    pub malformed: usize,
}

/// Owner of the pending snooze set and the undo stack.
///
/// The pending set is stored as one JSON array in the durable store; the undo
/// stack as one JSON array (most recent first) in the session store. Every
/// read-modify-write cycle goes through [`KeyValueStore::modify`], so
/// concurrent snoozes and wakeup passes cannot lose each other's updates,
/// whether they run in this process or in another one on the same files.
pub struct PersistentQueue {
    durable: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
}

impl PersistentQueue {
    pub fn new(durable: Arc<dyn KeyValueStore>, session: Arc<dyn KeyValueStore>) -> Self {
        Self { durable, session }
    }

    /// Read all pending entries, skipping malformed elements.
    ///
    /// Order is whatever was stored; entries may be long overdue if the host
    /// was offline.
    pub async fn load_pending(&self) -> Result<PendingSet> {
        let raw = self.durable.get(KEY_SNOOZED_TABS).await?;
        decode_pending(raw)
    }

    pub async fn list_pending(&self) -> Result<Vec<SnoozeEntry>> {
        Ok(self.load_pending().await?.entries)
    }

    /// Replace the whole pending set.
    ///
    /// Every entry is validated first; on any error nothing is written.
    pub async fn save_all(&self, entries: &[SnoozeEntry]) -> Result<()> {
        for entry in entries {
            entry.validate()?;
        }
        let value = serde_json::to_value(entries)?;
        self.durable.set(KEY_SNOOZED_TABS, value).await?;
        debug!(count = entries.len(), "pending set saved");
        Ok(())
    }

    /// Run `f` against the current pending set and persist its result, as
    /// one atomic store operation.
    ///
    /// If `f` fails, or the store rejects the write, the stored set is
    /// unchanged. Nothing is written when `f` leaves the set as it was.
    /// Callers adding entries validate them first.
    pub async fn update<F, R, E>(&self, f: F) -> std::result::Result<R, E>
    where
        F: FnOnce(&mut Vec<SnoozeEntry>) -> std::result::Result<R, E> + Send,
        R: Send,
        E: From<StoreError> + Send,
    {
        let mut out = None;
        self.durable
            .modify(
                KEY_SNOOZED_TABS,
                Box::new(|raw| {
                    let before = decode_pending(raw)?.entries;
                    let mut entries = before.clone();
                    let result = f(&mut entries);
                    let next = match &result {
                        Ok(_) if entries != before => {
                            debug!(count = entries.len(), "pending set saved");
                            Some(serde_json::to_value(&entries)?)
                        }
                        _ => None,
                    };
                    out = Some(result);
                    Ok(next)
                }),
            )
            .await?;
        out.unwrap_or_else(|| {
            Err(StoreError::Corrupt {
                key: KEY_SNOOZED_TABS.to_string(),
                reason: "update closure did not run".to_string(),
            }
            .into())
        })
    }

    /// Append one entry.
    pub async fn push_pending(&self, entry: SnoozeEntry) -> Result<()> {
        entry.validate()?;
        self.update(|entries| {
            entries.push(entry);
            Ok::<_, StoreError>(())
        })
        .await
    }

    // --- undo stack -------------------------------------------------------

    /// Most recent first.
    pub async fn list_undo(&self) -> Result<Vec<UndoItem>> {
        Ok(decode_undo(self.session.get(KEY_UNDO_STACK).await?))
    }

    /// Push `entry` to the front of the undo stack, stamped with `awoken_at`,
    /// keeping only the newest [`MAX_UNDO_DEPTH`] items.
    pub async fn push_undo(&self, entry: SnoozeEntry, awoken_at: DateTime<Utc>) -> Result<()> {
        self.session
            .modify(
                KEY_UNDO_STACK,
                Box::new(move |raw| {
                    let mut stack = decode_undo(raw);
                    stack.insert(0, UndoItem::capture(entry, awoken_at));
                    stack.truncate(MAX_UNDO_DEPTH);
                    Ok(Some(serde_json::to_value(&stack)?))
                }),
            )
            .await?;
        Ok(())
    }

    /// Remove and return the most recent item.
    pub async fn pop_undo(&self) -> Result<Option<UndoItem>> {
        let mut popped = None;
        self.session
            .modify(
                KEY_UNDO_STACK,
                Box::new(|raw| {
                    let mut stack = decode_undo(raw);
                    if stack.is_empty() {
                        return Ok(None);
                    }
                    popped = Some(stack.remove(0));
                    Ok(Some(serde_json::to_value(&stack)?))
                }),
            )
            .await?;
        Ok(popped)
    }

    pub async fn clear_undo(&self) -> Result<()> {
        self.session
            .set(KEY_UNDO_STACK, Value::Array(Vec::new()))
            .await?;
        info!("undo stack cleared");
        Ok(())
    }
}

fn decode_undo(raw: Option<Value>) -> Vec<UndoItem> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    match serde_json::from_value::<Vec<UndoItem>>(raw) {
        Ok(stack) => stack,
        Err(e) => {
            // The stack is a convenience; a bad one is discarded, not fatal.
            warn!(key = KEY_UNDO_STACK, "unreadable undo stack ignored: {e}");
            Vec::new()
        }
    }
}

fn decode_pending(raw: Option<Value>) -> Result<PendingSet> {
    let items = match raw {
        None | Some(Value::Null) => return Ok(PendingSet::default()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(StoreError::Corrupt {
                key: KEY_SNOOZED_TABS.to_string(),
                reason: format!("expected an array, found {}", json_kind(&other)),
            })
        }
    };

    let mut set = PendingSet::default();
    for (index, item) in items.into_iter().enumerate() {
        let kind = json_kind(&item);
        match serde_json::from_value::<SnoozeEntry>(item) {
            Ok(entry) => set.entries.push(entry),
            Err(e) => {
                warn!(key = KEY_SNOOZED_TABS, index, kind, "skipping malformed pending entry: {e}");
                set.malformed += 1;
            }
        }
    }
    Ok(set)
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
