//! # SQLite Document Store
//!
//! Keeps each document as a JSON object in a single `documents` table.
//!
//! ```text
//! ┌─────────────────┐
//! │  SqliteStore    │  DocumentStore impl
//! └────────┬────────┘
//!          │  one Mutex-guarded connection; each call is one statement
//!          │  or one transaction
//!          ▼
//! ┌─────────────────┐
//! │    rusqlite     │
//! └────────┬────────┘
//!          ▼
//! ┌─────────────────┐
//! │   SQLite DB     │  file for the CLI, memory for tests
//! └─────────────────┘
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use super::document::{apply_op, into_fields, merge_fields, prefix_upper_bound};
use super::{schema, Document, DocumentStore, FieldOp, Fields, Write};
use crate::error::{Error, Result};

/// SQLite-backed [`DocumentStore`].
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a store.
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub async fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::DatabaseError(format!("Failed to open database: {}", e)))?,
            None => Connection::open_in_memory().map_err(|e| {
                Error::DatabaseError(format!("Failed to create in-memory database: {}", e))
            })?,
        };

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;

        tracing::debug!(path = path.unwrap_or(":memory:"), "Document store opened");
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .ok();

        match version {
            None => {
                conn.execute_batch(schema::CREATE_TABLES)
                    .map_err(|e| Error::DatabaseError(format!("Failed to create tables: {}", e)))?;
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| Error::DatabaseError(format!("Failed to set schema version: {}", e)))?;

                tracing::info!("Database schema created (version {})", schema::SCHEMA_VERSION);
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(Error::DatabaseError(format!(
                    "Database schema version {} is newer than supported version {}",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(v) => {
                tracing::debug!("Database schema version {}", v);
            }
        }

        Ok(())
    }
}

fn read_doc(conn: &Connection, collection: &str, key: &str) -> Result<Option<Fields>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ? AND key = ?",
            params![collection, key],
            |row| row.get(0),
        )
        .optional()?;

    body.map(|b| parse_body(&b)).transpose()
}

fn write_doc(conn: &Connection, collection: &str, key: &str, fields: &Fields) -> Result<()> {
    let body = serde_json::to_string(fields)?;
    conn.execute(
        "INSERT INTO documents (collection, key, body, updated_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(collection, key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        params![collection, key, body, crate::time::now_timestamp_millis()],
    )?;
    Ok(())
}

fn parse_body(body: &str) -> Result<Fields> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| Error::StorageCorrupted(format!("invalid document JSON: {}", e)))?;
    into_fields(value)
}

fn apply_write(conn: &Connection, write: &Write) -> Result<()> {
    match write {
        Write::SetMerge {
            collection,
            key,
            fields,
        } => {
            let mut doc = read_doc(conn, collection, key)?.unwrap_or_default();
            merge_fields(&mut doc, fields.clone());
            write_doc(conn, collection, key, &doc)
        }
        Write::Update {
            collection,
            key,
            ops,
            missing_ok,
        } => match read_doc(conn, collection, key)? {
            Some(mut doc) => {
                for op in ops {
                    apply_op(&mut doc, op)?;
                }
                write_doc(conn, collection, key, &doc)
            }
            None if *missing_ok => Ok(()),
            None => Err(Error::DocumentNotFound {
                collection: collection.clone(),
                key: key.clone(),
            }),
        },
    }
}

fn collect_rows(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Document>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

    let mut documents = Vec::new();
    for row in rows {
        let (key, body) = row?;
        documents.push(Document {
            key,
            fields: parse_body(&body)?,
        });
    }
    Ok(documents)
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        let conn = self.conn.lock();
        Ok(read_doc(&conn, collection, key)?.map(|fields| Document {
            key: key.to_string(),
            fields,
        }))
    }

    async fn set_merge(&self, collection: &str, key: &str, fields: Fields) -> Result<()> {
        self.commit_batch(vec![Write::SetMerge {
            collection: collection.to_string(),
            key: key.to_string(),
            fields,
        }])
        .await
    }

    async fn update(&self, collection: &str, key: &str, ops: Vec<FieldOp>) -> Result<()> {
        self.commit_batch(vec![Write::Update {
            collection: collection.to_string(),
            key: key.to_string(),
            ops,
            missing_ok: false,
        }])
        .await
    }

    async fn query_prefix(
        &self,
        collection: &str,
        field: &str,
        prefix: &str,
    ) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        let path = format!("$.\"{}\"", field.replace('"', ""));
        let upper = prefix_upper_bound(prefix);
        collect_rows(
            &conn,
            "SELECT key, body FROM documents
             WHERE collection = ?1
               AND json_type(body, ?2) = 'text'
               AND json_extract(body, ?2) >= ?3
               AND json_extract(body, ?2) <= ?4
             ORDER BY key",
            &[&collection, &path, &prefix, &upper],
        )
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>> {
        let conn = self.conn.lock();
        collect_rows(
            &conn,
            "SELECT key, body FROM documents WHERE collection = ?1 ORDER BY key",
            &[&collection],
        )
    }

    async fn commit_batch(&self, writes: Vec<Write>) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for write in &writes {
            apply_write(&tx, write)?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::document::into_fields;
    use serde_json::json;

    #[tokio::test]
    async fn test_merge_and_update_roundtrip() {
        let store = SqliteStore::open(None).await.unwrap();

        store
            .set_merge(
                "relationships",
                "alice",
                into_fields(json!({ "pending": { "r1": { "senderId": "alice" } } })).unwrap(),
            )
            .await
            .unwrap();
        store
            .update(
                "relationships",
                "alice",
                vec![FieldOp::array_union("friendIds", "bob"), FieldOp::delete("pending.r1")],
            )
            .await
            .unwrap();

        let doc = store.get("relationships", "alice").await.unwrap().unwrap();
        assert_eq!(doc.fields["friendIds"], json!(["bob"]));
        assert_eq!(doc.fields["pending"], json!({}));
    }

    #[tokio::test]
    async fn test_update_missing_document() {
        let store = SqliteStore::open(None).await.unwrap();
        let result = store
            .update("relationships", "ghost", vec![FieldOp::delete("pending.x")])
            .await;
        assert!(matches!(result, Err(Error::DocumentNotFound { .. })));
    }

    #[tokio::test]
    async fn test_sqlite_failure_surfaces_as_database_error() {
        let store = SqliteStore::open(None).await.unwrap();
        store.conn.lock().execute_batch("DROP TABLE documents").unwrap();

        let err = store.get("users", "u1").await.unwrap_err();
        assert!(matches!(err, Error::DatabaseError(_)));
        assert_eq!(err.code(), 405);
        assert!(store.list("users").await.is_err());
    }

    #[tokio::test]
    async fn test_batch_rolls_back() {
        let store = SqliteStore::open(None).await.unwrap();
        let result = store
            .commit_batch(vec![
                Write::SetMerge {
                    collection: "relationships".into(),
                    key: "alice".into(),
                    fields: into_fields(json!({ "friendIds": ["bob"] })).unwrap(),
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
        assert!(store.get("relationships", "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prefix_query() {
        let store = SqliteStore::open(None).await.unwrap();
        for (id, name, email) in [
            ("u1", "alice", "alice@uni.edu"),
            ("u2", "alan", "al@uni.edu"),
            ("u3", "bob", "bob@uni.edu"),
        ] {
            store
                .set_merge("users", id, into_fields(json!({ "username": name, "email": email })).unwrap())
                .await
                .unwrap();
        }

        let hits = store.query_prefix("users", "username", "al").await.unwrap();
        let keys: Vec<_> = hits.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["u1", "u2"]);

        let hits = store.query_prefix("users", "email", "bob@").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "u3");
    }

    #[tokio::test]
    async fn test_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("studylink.db");
        let path = path.to_str().unwrap();

        {
            let store = SqliteStore::open(Some(path)).await.unwrap();
            store
                .set_merge("users", "u1", into_fields(json!({ "username": "alice" })).unwrap())
                .await
                .unwrap();
        }

        let reopened = SqliteStore::open(Some(path)).await.unwrap();
        let doc = reopened.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(doc.fields["username"], json!("alice"));
        assert_eq!(reopened.list("users").await.unwrap().len(), 1);
    }
}
