//! Core types for the convenience layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Name of the shared append-only change log collection, present in every
/// database this layer provisions.
pub const CHANGE_LOG: &str = "changelog";

/// A record key: an opaque, totally ordered value.
///
/// Integer keys sort before text keys; integers sort numerically, text
/// lexicographically. This matches the iteration order of the host engine's
/// cursors, so auto-incremented integer keys come back in insertion order.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Integer(i64),
    Text(String),
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Integer(n) => write!(f, "Key({n})"),
            Key::Text(s) => write!(f, "Key({s:?})"),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Integer(n) => write!(f, "{n}"),
            Key::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Integer(n)
    }
}

impl From<u64> for Key {
    fn from(n: u64) -> Self {
        Key::Integer(n as i64)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

/// Identifier of a change log entry, assigned by the store's key generator.
/// Unique and strictly increasing in insertion order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u64);

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The mutation a change log entry describes.
///
/// Writes carry the value as stored; deletes are tombstones, logged so that
/// removals are observable symmetrically with writes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChangeOp {
    Write { value: Value },
    Delete,
}

/// One completed mutation, as recorded in the change log.
///
/// Entries are append-only: this layer never mutates them, and removes them
/// only through the explicit retention operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    /// Log position, assigned by the store.
    pub id: EntryId,

    /// Record collection the mutation targeted.
    pub store: String,

    /// Key of the mutated record.
    pub key: Key,

    #[serde(flatten)]
    pub op: ChangeOp,
}

impl ChangeLogEntry {
    /// The written value, if this entry describes a write.
    pub fn value(&self) -> Option<&Value> {
        match &self.op {
            ChangeOp::Write { value } => Some(value),
            ChangeOp::Delete => None,
        }
    }
}
