//! # journalkv
//!
//! A thin convenience layer over a host-provided transactional key-value
//! storage engine: JSON-document read/write/delete, predicate-based bulk
//! read/delete, and change notification backed by an append-only change log.
//!
//! ## Core Concepts
//!
//! - **Dual-write**: every write (and delete) commits the record mutation
//!   and a change-log entry in one atomic transaction
//! - **Change log**: an append-only collection with store-assigned,
//!   strictly increasing entry ids, shared by all collections of a database
//! - **Observer**: a polling task that replays new log entries into a
//!   bounded channel, exactly once each, in ascending id order
//! - **Engine seam**: storage itself is the host engine's job; the
//!   [`engine`] traits describe the consumed surface, and
//!   [`engine::MemoryEngine`] provides an in-process implementation
//!
//! ## Example
//!
//! ```
//! use journalkv::{Db, ObserverConfig};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # fn main() -> journalkv::Result<()> {
//! let db = Db::in_memory();
//!
//! db.write("mydb", "kv", "user:1", json!({"name": "Ada", "age": 37}))?;
//! let value = db.read("mydb", "kv", "user:1")?;
//! assert_eq!(value, Some(json!({"name": "Ada", "age": 37})));
//!
//! let observer = db.observe(
//!     "mydb",
//!     ObserverConfig {
//!         interval: Duration::from_millis(10),
//!         ..Default::default()
//!     },
//! );
//! let entry = observer.recv_timeout(Duration::from_secs(1)).unwrap();
//! assert_eq!(entry.store, "kv");
//! observer.stop();
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod engine;
pub mod error;
pub mod observer;
pub mod types;

// Re-exports
pub use db::{Db, DbConfig, LogRetention};
pub use engine::{
    CollectionOptions, Cursor, CursorRow, Database, Engine, MemoryEngine, Schema, Transaction,
    TxMode,
};
pub use error::{DbError, Result};
pub use observer::{ObserverConfig, ObserverHandle};
pub use types::{ChangeLogEntry, ChangeOp, EntryId, Key, CHANGE_LOG};
