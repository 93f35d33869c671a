//! # StudyLink Core
//!
//! The friend-relationship and invitation protocol of the StudyLink
//! study-session app: who is friends with whom, which requests are waiting,
//! and how two users' documents are kept in step without a transaction
//! coordinator.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       STUDYLINK CORE MODULES                            │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────────┐  │
//! │  │  FriendsSession  │  │ RelationshipSvc  │  │  ConsistencyAuditor  │  │
//! │  │                  │  │                  │  │                      │  │
//! │  │ - Cached record  │─►│ - send / accept  │  │ - Scan all records   │  │
//! │  │ - Optimistic     │  │ - reject/remove  │  │ - Plan repairs       │  │
//! │  │ - Rollback       │  │ - Paired/Atomic  │  │ - Apply + re-check   │  │
//! │  └──────────────────┘  └────────┬─────────┘  └──────────┬───────────┘  │
//! │                                 │                       │              │
//! │  ┌──────────────────┐           │                       │              │
//! │  │ DirectoryService │           │                       │              │
//! │  │ - Prefix search  │           │                       │              │
//! │  │ - Profiles       │           │                       │              │
//! │  └────────┬─────────┘           │                       │              │
//! │           └─────────────────────┼───────────────────────┘              │
//! │                                 ▼                                       │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  DocumentStore: MemoryStore │ SqliteStore │ (hosted backend)    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types and user-facing notices
//! - [`config`] - Write mode and search settings
//! - [`storage`] - Document store trait and adapters
//! - [`directory`] - User profiles and search
//! - [`friends`] - The relationship protocol, session cache and audit
//! - [`time`] - Clocks
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use studylink_core::{CoreConfig, MemoryStore, RelationshipService};
//!
//! let store = Arc::new(MemoryStore::new());
//! let service = RelationshipService::new(store, &CoreConfig::default());
//!
//! let id = service.send_friend_request("alice", "bob").await?;
//! service.accept_request("bob", &id).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod directory;
pub mod error;
pub mod friends;
pub mod storage;
pub mod time;

pub use config::{CoreConfig, WriteMode};
pub use directory::{DirectoryService, UserProfile};
pub use error::{Error, Notice, Result};
pub use friends::{
    AuditReport, ConfirmChoice, ConfirmPrompt, Confirmation, ConsistencyAuditor, FriendRequest,
    FriendsSession, PairState, RelationshipRecord, RelationshipService, RemoveOutcome, Repair,
    RequestId, Violation,
};
pub use storage::{DocumentStore, MemoryStore, SqliteStore};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of StudyLink Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
