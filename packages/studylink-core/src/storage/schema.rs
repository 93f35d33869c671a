//! # Database Schema
//!
//! SQL schema for the SQLite document store.
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │             documents               │
//! ├─────────────────────────────────────┤
//! │ collection   TEXT  ─┐ primary key   │
//! │ key          TEXT  ─┘               │
//! │ body         TEXT  (JSON object)    │
//! │ updated_at   INTEGER (unix millis)  │
//! └─────────────────────────────────────┘
//! ```

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- One row per document; body is the JSON object the hosted backend would hold
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    key TEXT NOT NULL,
    body TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (collection, key)
);
"#;
