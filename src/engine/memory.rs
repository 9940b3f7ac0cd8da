//! In-process implementation of the host-engine seam.
//!
//! Collections are ordered maps, so cursors iterate in key order and
//! auto-keyed collections come back in insertion order. Transactions stage a
//! copy of their declared collections and swap it in on commit while holding
//! the database lock for their whole lifetime; dropping a transaction
//! without committing discards the stage, which gives abort semantics.
//! Holding the lock serializes transactions outright, a superset of the
//! "read-write transactions on overlapping collections never interleave"
//! contract.

use super::{CollectionOptions, Cursor, CursorRow, Database, Engine, Schema, Transaction, TxMode};
use crate::error::{DbError, Result};
use crate::types::Key;
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One named collection: ordered rows plus key-generator state.
#[derive(Clone, Debug, Default)]
struct Collection {
    rows: BTreeMap<Key, Value>,
    auto_key: Option<String>,
    next_id: u64,
}

struct DbState {
    version: u32,
    collections: HashMap<String, Collection>,
}

struct DbInner {
    state: Mutex<DbState>,
}

/// An in-memory storage engine holding any number of named databases.
///
/// Cheaply cloneable; clones share the same databases.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    databases: Arc<Mutex<HashMap<String, Arc<DbInner>>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for MemoryEngine {
    fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: &mut dyn FnMut(&mut dyn Schema) -> Result<()>,
    ) -> Result<Box<dyn Database>> {
        let inner = {
            let mut databases = self.databases.lock();
            databases
                .entry(name.to_string())
                .or_insert_with(|| {
                    Arc::new(DbInner {
                        state: Mutex::new(DbState {
                            version: 0,
                            collections: HashMap::new(),
                        }),
                    })
                })
                .clone()
        };

        // The upgrade hook runs on every open; creation of collections that
        // already exist is skipped by the hook via `has_collection`, so a
        // database lazily created by one caller (e.g. an observer that only
        // needs the change log) still gains collections a later caller names.
        {
            let mut state = inner.state.lock();
            let mut editor = SchemaEditor {
                collections: &mut state.collections,
            };
            upgrade(&mut editor).map_err(|e| DbError::Open(e.to_string()))?;
            if version > state.version {
                state.version = version;
            }
        }

        Ok(Box::new(MemoryDatabase { inner }))
    }
}

struct SchemaEditor<'a> {
    collections: &'a mut HashMap<String, Collection>,
}

impl Schema for SchemaEditor<'_> {
    fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    fn create_collection(&mut self, name: &str, options: CollectionOptions) -> Result<()> {
        if self.collections.contains_key(name) {
            return Err(DbError::Request(format!(
                "collection already exists: {name}"
            )));
        }
        self.collections.insert(
            name.to_string(),
            Collection {
                rows: BTreeMap::new(),
                auto_key: options.auto_key,
                next_id: 1,
            },
        );
        Ok(())
    }
}

struct MemoryDatabase {
    inner: Arc<DbInner>,
}

impl Database for MemoryDatabase {
    fn transaction<'a>(
        &'a self,
        collections: &[&str],
        mode: TxMode,
    ) -> Result<Box<dyn Transaction + 'a>> {
        let guard = self.inner.state.lock();

        let mut staged = HashMap::with_capacity(collections.len());
        for &name in collections {
            let col = guard
                .collections
                .get(name)
                .ok_or_else(|| DbError::Transaction(format!("unknown collection: {name}")))?;
            staged.insert(name.to_string(), col.clone());
        }

        Ok(Box::new(MemoryTransaction {
            guard,
            staged,
            mode,
        }))
    }
}

struct MemoryTransaction<'a> {
    guard: MutexGuard<'a, DbState>,
    staged: HashMap<String, Collection>,
    mode: TxMode,
}

impl MemoryTransaction<'_> {
    fn staged(&self, collection: &str) -> Result<&Collection> {
        self.staged
            .get(collection)
            .ok_or_else(|| DbError::Request(format!("collection not in transaction scope: {collection}")))
    }

    fn staged_mut(&mut self, collection: &str) -> Result<&mut Collection> {
        if self.mode != TxMode::ReadWrite {
            return Err(DbError::Request(
                "mutation in a read-only transaction".to_string(),
            ));
        }
        self.staged
            .get_mut(collection)
            .ok_or_else(|| DbError::Request(format!("collection not in transaction scope: {collection}")))
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn get(&self, collection: &str, key: &Key) -> Result<Option<Value>> {
        Ok(self.staged(collection)?.rows.get(key).cloned())
    }

    fn put(&mut self, collection: &str, key: &Key, value: &Value) -> Result<()> {
        self.staged_mut(collection)?
            .rows
            .insert(key.clone(), value.clone());
        Ok(())
    }

    fn delete(&mut self, collection: &str, key: &Key) -> Result<()> {
        self.staged_mut(collection)?.rows.remove(key);
        Ok(())
    }

    fn add(&mut self, collection: &str, mut value: Value) -> Result<u64> {
        let col = self.staged_mut(collection)?;
        let field = col.auto_key.clone().ok_or_else(|| {
            DbError::Request(format!("collection has no key generator: {collection}"))
        })?;

        let id = col.next_id;
        col.next_id += 1;

        match value.as_object_mut() {
            Some(obj) => {
                obj.insert(field, Value::from(id));
            }
            None => {
                return Err(DbError::Request(
                    "auto-keyed records must be objects".to_string(),
                ))
            }
        }
        col.rows.insert(Key::Integer(id as i64), value);
        Ok(id)
    }

    fn open_cursor<'c>(&'c mut self, collection: &str) -> Result<Box<dyn Cursor + 'c>> {
        let writable = self.mode == TxMode::ReadWrite;
        let col = self
            .staged
            .get_mut(collection)
            .ok_or_else(|| DbError::Request(format!("collection not in transaction scope: {collection}")))?;

        let keys: Vec<Key> = col.rows.keys().cloned().collect();
        Ok(Box::new(MemoryCursor {
            col,
            keys,
            pos: 0,
            current: None,
            writable,
        }))
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        if self.mode == TxMode::ReadWrite {
            for (name, col) in self.staged.drain() {
                self.guard.collections.insert(name, col);
            }
        }
        Ok(())
    }
}

struct MemoryCursor<'c> {
    col: &'c mut Collection,
    /// Key snapshot taken at cursor open; rows deleted mid-scan are skipped.
    keys: Vec<Key>,
    pos: usize,
    current: Option<Key>,
    writable: bool,
}

impl Cursor for MemoryCursor<'_> {
    fn advance(&mut self) -> Result<Option<CursorRow>> {
        while self.pos < self.keys.len() {
            let key = self.keys[self.pos].clone();
            self.pos += 1;
            if let Some(value) = self.col.rows.get(&key) {
                let row = CursorRow {
                    key: key.clone(),
                    value: value.clone(),
                };
                self.current = Some(key);
                return Ok(Some(row));
            }
        }
        self.current = None;
        Ok(None)
    }

    fn delete_current(&mut self) -> Result<()> {
        if !self.writable {
            return Err(DbError::Request(
                "cursor delete in a read-only transaction".to_string(),
            ));
        }
        match self.current.take() {
            Some(key) => {
                self.col.rows.remove(&key);
                Ok(())
            }
            None => Err(DbError::Request("cursor has no current record".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_with_kv(engine: &MemoryEngine, db: &str) -> Box<dyn Database> {
        engine
            .open(db, 1, &mut |schema| {
                if !schema.has_collection("kv") {
                    schema.create_collection("kv", CollectionOptions::explicit_key())?;
                }
                if !schema.has_collection("log") {
                    schema.create_collection("log", CollectionOptions::auto_key("id"))?;
                }
                Ok(())
            })
            .unwrap()
    }

    #[test]
    fn test_commit_makes_writes_visible() {
        let engine = MemoryEngine::new();
        let db = open_with_kv(&engine, "t");

        let mut tx = db.transaction(&["kv"], TxMode::ReadWrite).unwrap();
        tx.put("kv", &Key::from("a"), &json!(1)).unwrap();
        tx.commit().unwrap();

        let tx = db.transaction(&["kv"], TxMode::ReadOnly).unwrap();
        assert_eq!(tx.get("kv", &Key::from("a")).unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_drop_without_commit_aborts() {
        let engine = MemoryEngine::new();
        let db = open_with_kv(&engine, "t");

        {
            let mut tx = db.transaction(&["kv"], TxMode::ReadWrite).unwrap();
            tx.put("kv", &Key::from("a"), &json!(1)).unwrap();
            // dropped uncommitted
        }

        let tx = db.transaction(&["kv"], TxMode::ReadOnly).unwrap();
        assert_eq!(tx.get("kv", &Key::from("a")).unwrap(), None);
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let engine = MemoryEngine::new();
        let db = open_with_kv(&engine, "t");

        let mut tx = db.transaction(&["kv"], TxMode::ReadOnly).unwrap();
        let err = tx.put("kv", &Key::from("a"), &json!(1)).unwrap_err();
        assert!(matches!(err, DbError::Request(_)));
    }

    #[test]
    fn test_undeclared_collection_rejected() {
        let engine = MemoryEngine::new();
        let db = open_with_kv(&engine, "t");

        let tx = db.transaction(&["kv"], TxMode::ReadOnly).unwrap();
        let err = tx.get("log", &Key::Integer(1)).unwrap_err();
        assert!(matches!(err, DbError::Request(_)));
        // The open transaction holds the database lock for its lifetime;
        // release it before opening another on the same thread.
        drop(tx);

        let err = db
            .transaction(&["nope"], TxMode::ReadOnly)
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, DbError::Transaction(_)));
    }

    #[test]
    fn test_add_assigns_increasing_ids_and_injects_field() {
        let engine = MemoryEngine::new();
        let db = open_with_kv(&engine, "t");

        let mut tx = db.transaction(&["log"], TxMode::ReadWrite).unwrap();
        let first = tx.add("log", json!({"v": "a"})).unwrap();
        let second = tx.add("log", json!({"v": "b"})).unwrap();
        assert!(second > first);

        let row = tx.get("log", &Key::Integer(first as i64)).unwrap().unwrap();
        assert_eq!(row["id"], json!(first));
        tx.commit().unwrap();
    }

    #[test]
    fn test_cursor_iterates_in_key_order() {
        let engine = MemoryEngine::new();
        let db = open_with_kv(&engine, "t");

        let mut tx = db.transaction(&["kv"], TxMode::ReadWrite).unwrap();
        for k in ["b", "a", "c"] {
            tx.put("kv", &Key::from(k), &json!(k)).unwrap();
        }
        tx.commit().unwrap();

        let mut tx = db.transaction(&["kv"], TxMode::ReadOnly).unwrap();
        let mut cursor = tx.open_cursor("kv").unwrap();
        let mut seen = Vec::new();
        while let Some(row) = cursor.advance().unwrap() {
            seen.push(row.key);
        }
        assert_eq!(seen, vec![Key::from("a"), Key::from("b"), Key::from("c")]);
    }

    #[test]
    fn test_cursor_delete_current() {
        let engine = MemoryEngine::new();
        let db = open_with_kv(&engine, "t");

        let mut tx = db.transaction(&["kv"], TxMode::ReadWrite).unwrap();
        for k in ["a", "b", "c"] {
            tx.put("kv", &Key::from(k), &json!(k)).unwrap();
        }
        tx.commit().unwrap();

        let mut tx = db.transaction(&["kv"], TxMode::ReadWrite).unwrap();
        {
            let mut cursor = tx.open_cursor("kv").unwrap();
            while let Some(row) = cursor.advance().unwrap() {
                if row.key != Key::from("b") {
                    cursor.delete_current().unwrap();
                }
            }
        }
        tx.commit().unwrap();

        let tx = db.transaction(&["kv"], TxMode::ReadOnly).unwrap();
        assert_eq!(tx.get("kv", &Key::from("a")).unwrap(), None);
        assert_eq!(tx.get("kv", &Key::from("b")).unwrap(), Some(json!("b")));
        assert_eq!(tx.get("kv", &Key::from("c")).unwrap(), None);
    }

    #[test]
    fn test_clones_share_databases() {
        let engine = MemoryEngine::new();
        let db = open_with_kv(&engine, "shared");
        let mut tx = db.transaction(&["kv"], TxMode::ReadWrite).unwrap();
        tx.put("kv", &Key::from("a"), &json!(true)).unwrap();
        tx.commit().unwrap();
        drop(db);

        let other = engine.clone();
        let db = open_with_kv(&other, "shared");
        let tx = db.transaction(&["kv"], TxMode::ReadOnly).unwrap();
        assert_eq!(tx.get("kv", &Key::from("a")).unwrap(), Some(json!(true)));
    }
}
