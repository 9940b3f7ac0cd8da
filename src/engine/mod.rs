//! The host-engine seam.
//!
//! This layer does not implement storage of its own: it assumes a host
//! transactional key-value engine that provides per-transaction atomicity,
//! durable commit, and ordered cursor iteration over a collection's records.
//! These traits describe exactly the surface the layer consumes; the
//! [`memory`] module provides an in-process implementation for tests and
//! embedders without a native host store.

pub mod memory;

pub use memory::MemoryEngine;

use crate::error::Result;
use crate::types::Key;
use serde_json::Value;

/// Transaction mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

/// Options for creating a collection during an upgrade.
#[derive(Clone, Debug, Default)]
pub struct CollectionOptions {
    /// Field name that receives an auto-incremented integer key on `add`.
    /// `None` means an explicit key is supplied on every write.
    pub auto_key: Option<String>,
}

impl CollectionOptions {
    /// A collection keyed explicitly on every write.
    pub fn explicit_key() -> Self {
        Self { auto_key: None }
    }

    /// A collection with an auto-incrementing key injected into the named
    /// field of each added record.
    pub fn auto_key(field: impl Into<String>) -> Self {
        Self {
            auto_key: Some(field.into()),
        }
    }
}

/// One row yielded by a cursor.
#[derive(Clone, Debug)]
pub struct CursorRow {
    pub key: Key,
    pub value: Value,
}

/// Schema editor handed to the upgrade hook while a database is being
/// created or upgraded. The only schema change this layer ever performs is
/// first-time creation of missing collections.
pub trait Schema {
    fn has_collection(&self, name: &str) -> bool;

    fn create_collection(&mut self, name: &str, options: CollectionOptions) -> Result<()>;
}

/// A host storage engine: a namespace of named databases.
pub trait Engine: Send + Sync {
    /// Open a named database, invoking `upgrade` to create any missing
    /// collections. The returned handle is scoped to the caller: each
    /// operation acquires its own and releases it on drop.
    fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: &mut dyn FnMut(&mut dyn Schema) -> Result<()>,
    ) -> Result<Box<dyn Database>>;
}

/// An open database handle.
pub trait Database {
    /// Begin a transaction scoped to the given collections. Read-write
    /// transactions on overlapping collections are serialized by the engine;
    /// a transaction dropped without [`Transaction::commit`] is aborted and
    /// none of its operations become visible.
    fn transaction<'a>(
        &'a self,
        collections: &[&str],
        mode: TxMode,
    ) -> Result<Box<dyn Transaction + 'a>>;
}

/// An open transaction. Operations outside the declared collection scope
/// fail with a request error; mutations in a read-only transaction likewise.
pub trait Transaction {
    fn get(&self, collection: &str, key: &Key) -> Result<Option<Value>>;

    /// Store `value` under `key`, overwriting any prior value.
    fn put(&mut self, collection: &str, key: &Key, value: &Value) -> Result<()>;

    /// Remove the record at `key`. Removing an absent key is a no-op.
    fn delete(&mut self, collection: &str, key: &Key) -> Result<()>;

    /// Insert a record into an auto-keyed collection. The generated key is
    /// injected into the record's auto-key field and returned.
    fn add(&mut self, collection: &str, value: Value) -> Result<u64>;

    /// Open a forward cursor over the collection in key order.
    fn open_cursor<'c>(&'c mut self, collection: &str) -> Result<Box<dyn Cursor + 'c>>;

    /// Commit. Consumes the transaction; all buffered mutations become
    /// visible atomically, or none do if the commit fails.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// A forward cursor, advanced explicitly one record at a time.
pub trait Cursor {
    /// Step to the next record, or `None` once exhausted.
    fn advance(&mut self) -> Result<Option<CursorRow>>;

    /// Delete the record the cursor currently points at, without disturbing
    /// the traversal. Fails in a read-only transaction.
    fn delete_current(&mut self) -> Result<()>;
}
