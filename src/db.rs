//! The convenience layer facade.
//!
//! `Db` wraps a host engine with JSON-document CRUD over named collections,
//! predicate-based bulk reads and deletes, and a change log that every
//! mutation appends to atomically. Databases and their collections are
//! provisioned lazily on first access; each operation opens its own scoped
//! database handle and releases it on return.

use crate::engine::{CollectionOptions, Database, Engine, Transaction, TxMode};
use crate::error::Result;
use crate::observer::{spawn_observer, ObserverConfig, ObserverHandle};
use crate::types::{ChangeLogEntry, ChangeOp, EntryId, Key, CHANGE_LOG};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Schema version passed to the host engine on every open.
const DB_VERSION: u32 = 1;

/// Retention policy for the change log.
///
/// The log is append-only and grows without bound unless capped. With
/// `CapEntries(n)`, each mutating transaction drops the oldest entries
/// beyond `n` atomically with its own append, so a scan never observes the
/// log above the cap after a commit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogRetention {
    #[default]
    Unbounded,
    CapEntries(usize),
}

/// Configuration for a [`Db`].
#[derive(Clone, Debug, Default)]
pub struct DbConfig {
    pub retention: LogRetention,
}

/// Change-log entry as appended, before the store assigns its id.
#[derive(Serialize)]
struct NewEntry<'a> {
    store: &'a str,
    key: &'a Key,
    #[serde(flatten)]
    op: &'a ChangeOp,
}

/// The convenience layer over a host transactional store.
#[derive(Clone)]
pub struct Db {
    engine: Arc<dyn Engine>,
    config: DbConfig,
}

impl Db {
    /// Wrap a host engine with the default configuration.
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self::with_config(engine, DbConfig::default())
    }

    /// Wrap a host engine with an explicit configuration.
    pub fn with_config(engine: Arc<dyn Engine>, config: DbConfig) -> Self {
        Self { engine, config }
    }

    /// A `Db` backed by a fresh in-memory engine.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(crate::engine::MemoryEngine::new()))
    }

    // --- Mutations ---

    /// Write `value` under `key`, overwriting any prior value.
    ///
    /// The record write and a change-log append happen in one atomic
    /// transaction: after this returns, the log contains exactly one new
    /// entry `{store, key, value}` with an id greater than every prior
    /// entry's; if the transaction fails, neither is visible. Returns the
    /// assigned entry id.
    pub fn write(
        &self,
        db: &str,
        collection: &str,
        key: impl Into<Key>,
        value: Value,
    ) -> Result<EntryId> {
        let key = key.into();
        let handle = open_database(&*self.engine, db, &[collection])?;
        let mut tx = handle.transaction(&[collection, CHANGE_LOG], TxMode::ReadWrite)?;

        tx.put(collection, &key, &value)?;
        let op = ChangeOp::Write { value };
        let id = append_entry(&mut *tx, collection, &key, &op)?;
        enforce_retention(&mut *tx, self.config.retention)?;
        tx.commit()?;

        debug!(db, collection, key = %key, entry = id, "write committed");
        Ok(EntryId(id))
    }

    /// Remove the record at `key`.
    ///
    /// When a record was actually removed, a delete tombstone is appended to
    /// the change log in the same transaction and its entry id is returned.
    /// Deleting an absent key is a no-op, not a failure, and logs nothing.
    pub fn delete(
        &self,
        db: &str,
        collection: &str,
        key: impl Into<Key>,
    ) -> Result<Option<EntryId>> {
        let key = key.into();
        let handle = open_database(&*self.engine, db, &[collection])?;
        let mut tx = handle.transaction(&[collection, CHANGE_LOG], TxMode::ReadWrite)?;

        if tx.get(collection, &key)?.is_none() {
            return Ok(None);
        }

        tx.delete(collection, &key)?;
        let id = append_entry(&mut *tx, collection, &key, &ChangeOp::Delete)?;
        enforce_retention(&mut *tx, self.config.retention)?;
        tx.commit()?;

        debug!(db, collection, key = %key, entry = id, "delete committed");
        Ok(Some(EntryId(id)))
    }

    // --- Reads ---

    /// Read the record at `key`, or `None` if absent.
    pub fn read(&self, db: &str, collection: &str, key: impl Into<Key>) -> Result<Option<Value>> {
        let key = key.into();
        let handle = open_database(&*self.engine, db, &[collection])?;
        let tx = handle.transaction(&[collection], TxMode::ReadOnly)?;
        tx.get(collection, &key)
    }

    /// Collect every value for which `predicate` returns true, in the
    /// collection's iteration order, within one read-only transaction.
    ///
    /// An error returned by the predicate aborts the scan and propagates.
    pub fn read_many<F>(&self, db: &str, collection: &str, mut predicate: F) -> Result<Vec<Value>>
    where
        F: FnMut(&Value) -> Result<bool>,
    {
        let handle = open_database(&*self.engine, db, &[collection])?;
        let mut tx = handle.transaction(&[collection], TxMode::ReadOnly)?;
        let mut cursor = tx.open_cursor(collection)?;

        let mut matches = Vec::new();
        while let Some(row) = cursor.advance()? {
            if predicate(&row.value)? {
                matches.push(row.value);
            }
        }
        Ok(matches)
    }

    /// Delete every record whose value matches `predicate`, within one
    /// read-write transaction. Returns the number of records removed.
    ///
    /// All-or-nothing: a predicate or host failure aborts the transaction
    /// and no deletions become visible.
    pub fn delete_many<F>(&self, db: &str, collection: &str, mut predicate: F) -> Result<usize>
    where
        F: FnMut(&Value) -> Result<bool>,
    {
        let handle = open_database(&*self.engine, db, &[collection])?;
        let mut tx = handle.transaction(&[collection], TxMode::ReadWrite)?;

        let mut removed = 0;
        {
            let mut cursor = tx.open_cursor(collection)?;
            while let Some(row) = cursor.advance()? {
                if predicate(&row.value)? {
                    cursor.delete_current()?;
                    removed += 1;
                }
            }
        }
        tx.commit()?;

        debug!(db, collection, removed, "bulk delete committed");
        Ok(removed)
    }

    // --- Change log ---

    /// Scan the change log in ascending entry-id order.
    pub fn change_log(&self, db: &str) -> Result<Vec<ChangeLogEntry>> {
        let handle = open_database(&*self.engine, db, &[])?;
        let mut tx = handle.transaction(&[CHANGE_LOG], TxMode::ReadOnly)?;
        let mut cursor = tx.open_cursor(CHANGE_LOG)?;

        let mut entries = Vec::new();
        while let Some(row) = cursor.advance()? {
            entries.push(serde_json::from_value(row.value)?);
        }
        Ok(entries)
    }

    /// Remove change-log entries with id strictly less than `before`.
    /// Returns the number of entries removed.
    ///
    /// Safe to run while observers are active: observers track delivered ids
    /// themselves, so truncated entries are never re-delivered and entries
    /// not yet delivered are simply gone from every future scan.
    pub fn truncate_change_log(&self, db: &str, before: EntryId) -> Result<usize> {
        let handle = open_database(&*self.engine, db, &[])?;
        let mut tx = handle.transaction(&[CHANGE_LOG], TxMode::ReadWrite)?;

        let mut removed = 0;
        {
            let mut cursor = tx.open_cursor(CHANGE_LOG)?;
            while let Some(row) = cursor.advance()? {
                let entry: ChangeLogEntry = serde_json::from_value(row.value)?;
                if entry.id >= before {
                    break;
                }
                cursor.delete_current()?;
                removed += 1;
            }
        }
        tx.commit()?;

        debug!(db, removed, "change log truncated");
        Ok(removed)
    }

    // --- Observation ---

    /// Start observing this database's change log.
    ///
    /// A background task polls the log every `config.interval`, delivering
    /// each entry into the returned handle's channel exactly once, in
    /// ascending id order. Entries committed before the observer started are
    /// delivered on the first pass. Dropping the handle, or calling
    /// [`ObserverHandle::stop`], halts the task.
    pub fn observe(&self, db: &str, config: ObserverConfig) -> ObserverHandle {
        spawn_observer(Arc::clone(&self.engine), db.to_string(), config)
    }
}

/// Open a database, provisioning the change log and the named record
/// collections on first access.
pub(crate) fn open_database(
    engine: &dyn Engine,
    db: &str,
    collections: &[&str],
) -> Result<Box<dyn Database>> {
    engine.open(db, DB_VERSION, &mut |schema| {
        if !schema.has_collection(CHANGE_LOG) {
            schema.create_collection(CHANGE_LOG, CollectionOptions::auto_key("id"))?;
        }
        for &name in collections {
            if !schema.has_collection(name) {
                schema.create_collection(name, CollectionOptions::explicit_key())?;
            }
        }
        Ok(())
    })
}

fn append_entry(tx: &mut dyn Transaction, store: &str, key: &Key, op: &ChangeOp) -> Result<u64> {
    let payload = serde_json::to_value(NewEntry { store, key, op })?;
    tx.add(CHANGE_LOG, payload)
}

fn enforce_retention(tx: &mut dyn Transaction, retention: LogRetention) -> Result<()> {
    let cap = match retention {
        LogRetention::Unbounded => return Ok(()),
        LogRetention::CapEntries(cap) => cap,
    };

    let keys = {
        let mut cursor = tx.open_cursor(CHANGE_LOG)?;
        let mut keys = Vec::new();
        while let Some(row) = cursor.advance()? {
            keys.push(row.key);
        }
        keys
    };

    if keys.len() > cap {
        for key in &keys[..keys.len() - cap] {
            tx.delete(CHANGE_LOG, key)?;
        }
    }
    Ok(())
}
