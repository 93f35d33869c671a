//! # Storage Module
//!
//! The document store that holds user profiles and relationship records.
//!
//! ## Storage Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE SYSTEM                                  │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  DocumentStore (trait)                                          │   │
//! │  │  ─────────────────────                                           │   │
//! │  │  get · set_merge · update · query_prefix · list · commit_batch │   │
//! │  └───────────────┬──────────────────────────────┬──────────────────┘   │
//! │                  │                              │                       │
//! │                  ▼                              ▼                       │
//! │  ┌───────────────────────────┐  ┌───────────────────────────────────┐  │
//! │  │  MemoryStore              │  │  SqliteStore                      │  │
//! │  │  parking_lot RwLock       │  │  rusqlite, JSON bodies            │  │
//! │  │  tests, demos             │  │  CLI                              │  │
//! │  └───────────────────────────┘  └───────────────────────────────────┘  │
//! │                                                                         │
//! │  Collections:                                                          │
//! │  • users          - { userId, username, email, profileImage? }         │
//! │  • relationships  - { friendIds: [..], pending: { id: request } }      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every single-document call is atomic. Nothing spans two documents except
//! [`DocumentStore::commit_batch`].

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};

pub mod document;
mod memory;
mod schema;
mod sqlite;

#[cfg(test)]
pub(crate) mod testing;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Collection names.
pub mod collections {
    /// User profiles, keyed by user id.
    pub const USERS: &str = "users";
    /// Relationship records, keyed by user id.
    pub const RELATIONSHIPS: &str = "relationships";
}

/// Top-level fields of a document.
pub type Fields = serde_json::Map<String, Value>;

/// A stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Document key within its collection
    pub key: String,
    /// Document body
    pub fields: Fields,
}

/// A field-level mutation applied by [`DocumentStore::update`].
///
/// Paths are dot-separated (`pending.alice_bob_1000`).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// Overwrite the value at `path`.
    Set {
        /// Dotted field path
        path: String,
        /// New value
        value: Value,
    },
    /// Remove the value at `path`. Missing paths are ignored.
    Delete {
        /// Dotted field path
        path: String,
    },
    /// Append each value not already present in the array at `path`.
    ArrayUnion {
        /// Dotted field path
        path: String,
        /// Values to add
        values: Vec<Value>,
    },
    /// Remove every occurrence of each value from the array at `path`.
    ArrayRemove {
        /// Dotted field path
        path: String,
        /// Values to remove
        values: Vec<Value>,
    },
}

impl FieldOp {
    /// `Set` shorthand
    pub fn set(path: impl Into<String>, value: Value) -> Self {
        FieldOp::Set {
            path: path.into(),
            value,
        }
    }

    /// `Delete` shorthand
    pub fn delete(path: impl Into<String>) -> Self {
        FieldOp::Delete { path: path.into() }
    }

    /// `ArrayUnion` of a single string
    pub fn array_union(path: impl Into<String>, value: &str) -> Self {
        FieldOp::ArrayUnion {
            path: path.into(),
            values: vec![Value::String(value.to_string())],
        }
    }

    /// `ArrayRemove` of a single string
    pub fn array_remove(path: impl Into<String>, value: &str) -> Self {
        FieldOp::ArrayRemove {
            path: path.into(),
            values: vec![Value::String(value.to_string())],
        }
    }

    /// The path this op touches
    pub fn path(&self) -> &str {
        match self {
            FieldOp::Set { path, .. }
            | FieldOp::Delete { path }
            | FieldOp::ArrayUnion { path, .. }
            | FieldOp::ArrayRemove { path, .. } => path,
        }
    }
}

/// One document write, as submitted to a batch or replayed by a repair.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Deep-merge `fields` into the document, creating it when absent.
    SetMerge {
        /// Collection name
        collection: String,
        /// Document key
        key: String,
        /// Fields to merge
        fields: Fields,
    },
    /// Apply `ops` to an existing document.
    Update {
        /// Collection name
        collection: String,
        /// Document key
        key: String,
        /// Field mutations, applied in order
        ops: Vec<FieldOp>,
        /// Treat an absent document as success instead of `DocumentNotFound`.
        missing_ok: bool,
    },
}

impl Write {
    /// Collection the write targets
    pub fn collection(&self) -> &str {
        match self {
            Write::SetMerge { collection, .. } | Write::Update { collection, .. } => collection,
        }
    }

    /// Document key the write targets
    pub fn key(&self) -> &str {
        match self {
            Write::SetMerge { key, .. } | Write::Update { key, .. } => key,
        }
    }
}

/// Async document database.
///
/// The relationship protocol only ever talks to storage through this trait,
/// so a hosted backend can be substituted for the local adapters.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document. Absent documents are `Ok(None)`.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>>;

    /// Deep-merge `fields` into a document, creating it when absent.
    async fn set_merge(&self, collection: &str, key: &str, fields: Fields) -> Result<()>;

    /// Apply field ops to an existing document in one atomic step.
    ///
    /// Fails with [`Error::DocumentNotFound`] when the document is absent.
    async fn update(&self, collection: &str, key: &str, ops: Vec<FieldOp>) -> Result<()>;

    /// Documents whose string `field` lies in the range
    /// `[prefix, prefix + '\u{f8ff}']`.
    async fn query_prefix(&self, collection: &str, field: &str, prefix: &str)
        -> Result<Vec<Document>>;

    /// Every document in a collection, ordered by key.
    async fn list(&self, collection: &str) -> Result<Vec<Document>>;

    /// Apply all writes atomically.
    async fn commit_batch(&self, writes: Vec<Write>) -> Result<()>;

    /// Apply a single [`Write`].
    async fn apply(&self, write: Write) -> Result<()> {
        match write {
            Write::SetMerge {
                collection,
                key,
                fields,
            } => self.set_merge(&collection, &key, fields).await,
            Write::Update {
                collection,
                key,
                ops,
                missing_ok,
            } => match self.update(&collection, &key, ops).await {
                Err(Error::DocumentNotFound { .. }) if missing_ok => {
                    tracing::debug!(collection = %collection, key = %key, "Skipping update of absent document");
                    Ok(())
                }
                other => other,
            },
        }
    }
}
