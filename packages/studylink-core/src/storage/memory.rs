//! In-memory document store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::document::{apply_op, merge_fields, prefix_matches};
use super::{Document, DocumentStore, FieldOp, Fields, Write};
use crate::error::{Error, Result};

type Collections = HashMap<String, BTreeMap<String, Fields>>;

/// A [`DocumentStore`] held entirely in memory.
///
/// Each call takes the lock once, so single-document updates and batches
/// are atomic with respect to other callers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    /// True when the collection holds no documents
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

fn apply_write(collections: &mut Collections, write: &Write) -> Result<()> {
    match write {
        Write::SetMerge {
            collection,
            key,
            fields,
        } => {
            let doc = collections
                .entry(collection.clone())
                .or_default()
                .entry(key.clone())
                .or_default();
            merge_fields(doc, fields.clone());
            Ok(())
        }
        Write::Update {
            collection,
            key,
            ops,
            missing_ok,
        } => {
            let doc = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(key));
            match doc {
                Some(doc) => update_in_place(doc, ops),
                None if *missing_ok => Ok(()),
                None => Err(Error::DocumentNotFound {
                    collection: collection.clone(),
                    key: key.clone(),
                }),
            }
        }
    }
}

fn update_in_place(doc: &mut Fields, ops: &[FieldOp]) -> Result<()> {
    // Apply to a copy so a failing op leaves the document untouched.
    let mut updated = doc.clone();
    for op in ops {
        apply_op(&mut updated, op)?;
    }
    *doc = updated;
    Ok(())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(key))
            .map(|fields| Document {
                key: key.to_string(),
                fields: fields.clone(),
            }))
    }

    async fn set_merge(&self, collection: &str, key: &str, fields: Fields) -> Result<()> {
        let write = Write::SetMerge {
            collection: collection.to_string(),
            key: key.to_string(),
            fields,
        };
        apply_write(&mut self.collections.write(), &write)
    }

    async fn update(&self, collection: &str, key: &str, ops: Vec<FieldOp>) -> Result<()> {
        let write = Write::Update {
            collection: collection.to_string(),
            key: key.to_string(),
            ops,
            missing_ok: false,
        };
        apply_write(&mut self.collections.write(), &write)
    }

    async fn query_prefix(
        &self,
        collection: &str,
        field: &str,
        prefix: &str,
    ) -> Result<Vec<Document>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, fields)| prefix_matches(fields, field, prefix))
                    .map(|(key, fields)| Document {
                        key: key.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(key, fields)| Document {
                        key: key.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn commit_batch(&self, writes: Vec<Write>) -> Result<()> {
        let mut guard = self.collections.write();
        let mut staged = guard.clone();
        for write in &writes {
            apply_write(&mut staged, write)?;
        }
        *guard = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::document::into_fields;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_absent_document() {
        let store = MemoryStore::new();
        assert!(store.get("users", "nobody").await.unwrap().is_none());
        assert!(store.is_empty("users"));
    }

    #[tokio::test]
    async fn test_update_requires_document() {
        let store = MemoryStore::new();
        let result = store
            .update("relationships", "alice", vec![FieldOp::array_union("friendIds", "bob")])
            .await;
        assert!(matches!(result, Err(Error::DocumentNotFound { .. })));

        let lenient = Write::Update {
            collection: "relationships".into(),
            key: "alice".into(),
            ops: vec![FieldOp::delete("pending.x")],
            missing_ok: true,
        };
        assert!(store.apply(lenient).await.is_ok());
        assert!(store.get("relationships", "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let store = MemoryStore::new();
        store
            .set_merge("relationships", "alice", into_fields(json!({ "friendIds": [] })).unwrap())
            .await
            .unwrap();

        let result = store
            .commit_batch(vec![
                Write::Update {
                    collection: "relationships".into(),
                    key: "alice".into(),
                    ops: vec![FieldOp::array_union("friendIds", "bob")],
                    missing_ok: false,
                },
                Write::Update {
                    collection: "relationships".into(),
                    key: "bob".into(),
                    ops: vec![FieldOp::array_union("friendIds", "alice")],
                    missing_ok: false,
                },
            ])
            .await;

        assert!(result.is_err());
        let alice = store.get("relationships", "alice").await.unwrap().unwrap();
        assert_eq!(alice.fields["friendIds"], json!([]));
    }

    #[tokio::test]
    async fn test_query_prefix_and_list() {
        let store = MemoryStore::new();
        for (id, name) in [("u1", "alice"), ("u2", "alan"), ("u3", "bob")] {
            store
                .set_merge("users", id, into_fields(json!({ "username": name })).unwrap())
                .await
                .unwrap();
        }

        let hits = store.query_prefix("users", "username", "al").await.unwrap();
        let keys: Vec<_> = hits.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["u1", "u2"]);

        assert_eq!(store.list("users").await.unwrap().len(), 3);
        assert!(store.list("relationships").await.unwrap().is_empty());
    }
}
