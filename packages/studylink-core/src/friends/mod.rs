//! # Friends Module
//!
//! Friend relationships between two users, kept in two independent
//! relationship records.
//!
//! ## Friend Request Flow
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      FRIEND REQUEST FLOW                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  relationships/alice                      relationships/bob             │
//! │  ─────────────────────────────────────────────────────────────         │
//! │                                                                         │
//! │  1. send_friend_request(alice, bob)                                    │
//! │  ┌──────────────────────────────┐       ┌──────────────────────────┐   │
//! │  │ pending.alice_bob_1000 = {   │       │ pending.alice_bob_1000   │   │
//! │  │   senderId: alice,           │  ══   │   (identical copy)       │   │
//! │  │   receiverId: bob,           │       │                          │   │
//! │  │   status: pending }          │       │                          │   │
//! │  └──────────────────────────────┘       └──────────────────────────┘   │
//! │                                                                         │
//! │  2a. accept_request(bob, id)            2b. reject_request(bob, id)    │
//! │  ┌──────────────────────────────┐       ┌──────────────────────────┐   │
//! │  │ bob:   friendIds ∪ {alice}   │       │ bob:   delete pending.id │   │
//! │  │        delete pending.id     │       │ alice: delete pending.id │   │
//! │  │ alice: friendIds ∪ {bob}     │       └──────────────────────────┘   │
//! │  │        delete pending.id     │                                      │
//! │  └──────────────────────────────┘                                      │
//! │                                                                         │
//! │  3. remove_friend(alice, bob, confirm)                                 │
//! │  ┌──────────────────────────────┐                                      │
//! │  │ alice: friendIds ∖ {bob}     │                                      │
//! │  │ bob:   friendIds ∖ {alice}   │                                      │
//! │  └──────────────────────────────┘                                      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Documents, No Coordinator
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     WRITE MODES                                         │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Paired (default)                                                      │
//! │  ────────────────                                                       │
//! │  Two independent single-document writes, acting user's record first.  │
//! │  If the second write fails the caller gets Error::PartialWrite with    │
//! │  the missing half as a Repair; replaying it is idempotent.             │
//! │                                                                         │
//! │  Atomic                                                                │
//! │  ──────                                                                 │
//! │  Both writes go through DocumentStore::commit_batch: all or nothing.   │
//! │                                                                         │
//! │  Either way, ConsistencyAuditor scans every record and repairs what    │
//! │  concurrent sessions or lost writes left behind.                       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::storage::{Document, FieldOp, Fields, Write};

pub mod audit;
mod service;
pub mod session;
pub mod view;

pub use audit::{AuditReport, ConsistencyAuditor, RepairOutcome, Violation};
pub use service::{IncomingRequest, OutgoingRequest, RelationshipService};
pub use session::FriendsSession;
pub use view::Optimistic;

/// Field holding the friend id set
pub const FRIEND_IDS_FIELD: &str = "friendIds";

/// Field holding the pending request map
pub const PENDING_FIELD: &str = "pending";

/// Older records spelled the friend list differently. These are read and
/// removed from, never added to.
pub const LEGACY_FRIEND_FIELDS: [&str; 2] = ["friendsId", "friends"];

/// Ops that drop `friend` from the friend list under every spelling.
pub(crate) fn drop_friend_ops(friend: &str) -> Vec<FieldOp> {
    std::iter::once(FRIEND_IDS_FIELD)
        .chain(LEGACY_FRIEND_FIELDS)
        .map(|field| FieldOp::array_remove(field, friend))
        .collect()
}

// ============================================================================
// REQUEST IDENTIFIER
// ============================================================================

/// Identifier of one friend request: `{senderId}_{receiverId}_{millis}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

/// The three parts of a [`RequestId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdParts {
    /// Sending user
    pub sender_id: String,
    /// Receiving user
    pub receiver_id: String,
    /// Creation time in milliseconds
    pub created_at_millis: i64,
}

impl RequestId {
    /// Build the identifier for a request created at `millis`.
    pub fn generate(sender_id: &str, receiver_id: &str, millis: i64) -> Self {
        Self(format!("{}_{}_{}", sender_id, receiver_id, millis))
    }

    /// Wrap an existing identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as stored
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time embedded in the identifier, if it parses.
    pub fn created_at_millis(&self) -> Option<i64> {
        self.0
            .rsplit_once('_')
            .and_then(|(_, millis)| millis.parse().ok())
    }

    /// Split the identifier into sender, receiver and creation time.
    ///
    /// User ids may contain underscores. The timestamp is split from the
    /// right; when `known_sender` is given and matches, the rest after it is
    /// the receiver, otherwise the split is at the first underscore.
    pub fn parts(&self, known_sender: Option<&str>) -> Result<RequestIdParts> {
        let invalid = || Error::InvalidRequestId(self.0.clone());

        let (pair, millis) = self.0.rsplit_once('_').ok_or_else(invalid)?;
        let created_at_millis = millis.parse::<i64>().map_err(|_| invalid())?;

        let known = known_sender.and_then(|sender| {
            pair.strip_prefix(sender)
                .and_then(|rest| rest.strip_prefix('_'))
                .map(|receiver| (sender, receiver))
        });
        let (sender, receiver) = match known {
            Some(split) => split,
            None => pair.split_once('_').ok_or_else(invalid)?,
        };

        if sender.is_empty() || receiver.is_empty() {
            return Err(invalid());
        }

        Ok(RequestIdParts {
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            created_at_millis,
        })
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ============================================================================
// FRIEND REQUEST
// ============================================================================

/// Status of a friend request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    /// Awaiting the receiver
    #[default]
    Pending,
    /// Accepted (completed requests are deleted, so rarely seen)
    Accepted,
    /// Rejected (completed requests are deleted, so rarely seen)
    Rejected,
}

impl RequestStatus {
    /// Stored spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        }
    }
}

/// One entry of a record's pending map. Both parties hold an identical copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    /// Sending user
    pub sender_id: String,
    /// Receiving user
    pub receiver_id: String,
    /// Request status
    #[serde(default)]
    pub status: RequestStatus,
}

impl FriendRequest {
    /// A new pending request
    pub fn pending(sender_id: &str, receiver_id: &str) -> Self {
        Self {
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            status: RequestStatus::Pending,
        }
    }

    /// True when `user_id` is sender or receiver
    pub fn involves(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.receiver_id == user_id
    }

    /// The party that is not `user_id`
    pub fn counterpart(&self, user_id: &str) -> &str {
        if self.sender_id == user_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }

    pub(crate) fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

// ============================================================================
// RELATIONSHIP RECORD
// ============================================================================

/// A user's relationship document.
///
/// An absent document reads as the empty record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipRecord {
    /// Friend ids, in stored order without duplicates
    pub friend_ids: Vec<String>,
    /// Pending requests keyed by request id
    pub pending: BTreeMap<RequestId, FriendRequest>,
}

impl RelationshipRecord {
    /// Parse a stored document body.
    ///
    /// The friend list is the union of `friendIds` and the legacy
    /// spellings. Malformed pending entries are skipped.
    pub fn from_fields(fields: &Fields) -> Self {
        let mut friend_ids: Vec<String> = Vec::new();
        let names = std::iter::once(FRIEND_IDS_FIELD).chain(LEGACY_FRIEND_FIELDS);
        for name in names {
            if let Some(Value::Array(items)) = fields.get(name) {
                for id in items.iter().filter_map(Value::as_str) {
                    if !friend_ids.iter().any(|f| f == id) {
                        friend_ids.push(id.to_string());
                    }
                }
            }
        }

        let mut pending = BTreeMap::new();
        if let Some(Value::Object(entries)) = fields.get(PENDING_FIELD) {
            for (id, entry) in entries {
                match serde_json::from_value::<FriendRequest>(entry.clone()) {
                    Ok(request) => {
                        pending.insert(RequestId::new(id.clone()), request);
                    }
                    Err(e) => {
                        tracing::warn!(request_id = %id, "Skipping malformed pending entry: {}", e);
                    }
                }
            }
        }

        Self {
            friend_ids,
            pending,
        }
    }

    /// Parse an optional document; `None` is the empty record.
    pub fn from_document(document: Option<&Document>) -> Self {
        document
            .map(|doc| Self::from_fields(&doc.fields))
            .unwrap_or_default()
    }

    /// True when `user_id` is in the friend list
    pub fn is_friend(&self, user_id: &str) -> bool {
        self.friend_ids.iter().any(|f| f == user_id)
    }

    /// Pending requests addressed to `me`
    pub fn incoming<'a>(&'a self, me: &'a str) -> impl Iterator<Item = (&'a RequestId, &'a FriendRequest)> + 'a {
        self.pending
            .iter()
            .filter(move |(_, r)| r.receiver_id == me && r.status == RequestStatus::Pending)
    }

    /// Pending requests sent by `me`
    pub fn outgoing<'a>(&'a self, me: &'a str) -> impl Iterator<Item = (&'a RequestId, &'a FriendRequest)> + 'a {
        self.pending
            .iter()
            .filter(move |(_, r)| r.sender_id == me && r.status == RequestStatus::Pending)
    }

    /// Pending requests from `sender` to `receiver`, oldest id first
    pub fn pending_between<'a>(
        &'a self,
        sender: &'a str,
        receiver: &'a str,
    ) -> impl Iterator<Item = (&'a RequestId, &'a FriendRequest)> + 'a {
        self.pending.iter().filter(move |(_, r)| {
            r.sender_id == sender && r.receiver_id == receiver && r.status == RequestStatus::Pending
        })
    }

    /// True when a pending request from `sender` to `receiver` exists
    pub fn has_pending(&self, sender: &str, receiver: &str) -> bool {
        self.pending_between(sender, receiver).next().is_some()
    }
}

// ============================================================================
// OUTCOMES
// ============================================================================

/// How two users relate, as seen from both records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum PairState {
    /// No friendship, no pending request
    None,
    /// A request from `sender` is waiting
    Pending {
        /// Who sent it
        sender: String,
    },
    /// Mutual friends
    Friends,
    /// The two records disagree
    Inconsistent {
        /// What disagrees
        detail: String,
    },
}

/// Writes that complete or undo a half-applied operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Repair {
    /// Human-readable summary
    pub description: String,
    /// Writes to replay, in order
    pub writes: Vec<Write>,
}

/// Result of [`RelationshipService::remove_friend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// Both records were updated
    Removed,
    /// Nothing to remove
    NotFriends,
    /// The user declined the confirmation
    Cancelled,
}

// ============================================================================
// CONFIRMATION
// ============================================================================

/// Text shown when asking the user to confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmPrompt {
    /// Dialog title
    pub title: String,
    /// Dialog body
    pub message: String,
}

impl ConfirmPrompt {
    /// Prompt for removing a friend
    pub fn remove_friend(friend_name: &str) -> Self {
        Self {
            title: "Remove Friend".to_string(),
            message: format!(
                "Are you sure you want to remove {} from your friends?",
                friend_name
            ),
        }
    }
}

/// The user's answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmChoice {
    /// Go ahead
    Confirm,
    /// Do nothing
    Cancel,
}

/// Blocking confirmation step before a destructive operation.
#[async_trait]
pub trait Confirmation: Send + Sync {
    /// Ask the user and wait for an answer.
    async fn confirm(&self, prompt: &ConfirmPrompt) -> ConfirmChoice;
}

/// A fixed answer, for non-interactive callers and tests.
#[async_trait]
impl Confirmation for ConfirmChoice {
    async fn confirm(&self, _prompt: &ConfirmPrompt) -> ConfirmChoice {
        *self
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::document::into_fields;
    use serde_json::json;

    #[test]
    fn test_request_id_format() {
        let id = RequestId::generate("alice", "bob", 1000);
        assert_eq!(id.as_str(), "alice_bob_1000");
        assert_eq!(id.created_at_millis(), Some(1000));

        let parts = id.parts(None).unwrap();
        assert_eq!(parts.sender_id, "alice");
        assert_eq!(parts.receiver_id, "bob");
        assert_eq!(parts.created_at_millis, 1000);
    }

    #[test]
    fn test_request_id_with_underscored_users() {
        let id = RequestId::generate("user_a", "user_b", 42);
        let parts = id.parts(Some("user_a")).unwrap();
        assert_eq!(parts.sender_id, "user_a");
        assert_eq!(parts.receiver_id, "user_b");

        assert!(RequestId::new("garbage").parts(None).is_err());
        assert!(RequestId::new("a_b_notanumber").parts(None).is_err());
        assert_eq!(RequestId::new("garbage").created_at_millis(), None);
    }

    #[test]
    fn test_record_reads_legacy_friend_fields() {
        let fields = into_fields(json!({
            "friendIds": ["bob"],
            "friendsId": ["carol", "bob"],
            "friends": ["dave"],
        }))
        .unwrap();

        let record = RelationshipRecord::from_fields(&fields);
        assert_eq!(record.friend_ids, vec!["bob", "carol", "dave"]);
        assert!(record.is_friend("carol"));
        assert!(record.pending.is_empty());
    }

    #[test]
    fn test_record_pending_views() {
        let fields = into_fields(json!({
            "pending": {
                "alice_bob_1": { "senderId": "alice", "receiverId": "bob", "status": "pending" },
                "carol_alice_2": { "senderId": "carol", "receiverId": "alice", "status": "pending" },
                "broken": { "senderId": 7 },
            }
        }))
        .unwrap();

        let record = RelationshipRecord::from_fields(&fields);
        assert_eq!(record.pending.len(), 2);
        assert_eq!(record.outgoing("alice").count(), 1);
        assert_eq!(record.incoming("alice").count(), 1);
        assert!(record.has_pending("alice", "bob"));
        assert!(!record.has_pending("bob", "alice"));
    }

    #[test]
    fn test_absent_document_is_empty_record() {
        assert_eq!(RelationshipRecord::from_document(None), RelationshipRecord::default());
    }

    #[test]
    fn test_request_serializes_camel_case() {
        let value = FriendRequest::pending("alice", "bob").to_value().unwrap();
        assert_eq!(
            value,
            json!({ "senderId": "alice", "receiverId": "bob", "status": "pending" })
        );
    }

    #[test]
    fn test_fixed_confirmation() {
        let prompt = ConfirmPrompt::remove_friend("bob");
        let choice = tokio_test::block_on(ConfirmChoice::Cancel.confirm(&prompt));
        assert_eq!(choice, ConfirmChoice::Cancel);
        assert!(prompt.message.contains("bob"));
    }
}
