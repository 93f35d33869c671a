//! # Consistency Audit
//!
//! Scans every relationship record and finds pairs whose two documents
//! disagree. Paired writes can leave these behind when the second write is
//! lost, and concurrent sessions on the same pair can create duplicates.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      VIOLATIONS AND REPAIRS                             │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  AsymmetricFriendship   holder lists missing, not the reverse          │
//! │    missing still holds the request   → finish the accept               │
//! │    otherwise                         → drop missing from holder         │
//! │                                                                         │
//! │  OrphanedRequest        entry in one record only → delete it           │
//! │  MismatchedRequest      copies differ → receiver takes sender's copy   │
//! │  DuplicatePending       same sender→receiver twice → keep the oldest   │
//! │  MisfiledRequest        entry names neither party → delete it          │
//! │  PendingBetweenFriends  pair already friends → delete from both        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use super::service::pending_path;
use super::{
    drop_friend_ops, FriendRequest, RelationshipRecord, Repair, RequestId, RequestStatus,
    FRIEND_IDS_FIELD,
};
use crate::error::Result;
use crate::storage::{collections, DocumentStore, FieldOp, Write};

/// One disagreement between records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Violation {
    /// `holder` lists `missing` as a friend; `missing` does not list `holder`.
    AsymmetricFriendship {
        /// Record that has the friend id
        holder: String,
        /// User whose record lacks it
        missing: String,
        /// A pending request from `missing` to `holder` still in `missing`'s
        /// record, meaning an accept was half-applied
        pending_request: Option<RequestId>,
    },
    /// A pending entry held by one party only.
    OrphanedRequest {
        /// Request identifier
        request_id: RequestId,
        /// The entry
        request: FriendRequest,
        /// Record holding it
        present_in: String,
        /// Record lacking it
        missing_from: String,
    },
    /// Both parties hold the entry but the copies differ.
    MismatchedRequest {
        /// Request identifier
        request_id: RequestId,
        /// Copy in the sender's record
        sender_copy: FriendRequest,
        /// Copy in the receiver's record
        receiver_copy: FriendRequest,
    },
    /// More than one pending request from the same sender to the same receiver.
    DuplicatePending {
        /// Sending user
        sender: String,
        /// Receiving user
        receiver: String,
        /// All identifiers, oldest first
        request_ids: Vec<RequestId>,
    },
    /// A pending entry in a record of a user who is neither party.
    MisfiledRequest {
        /// Request identifier
        request_id: RequestId,
        /// Record holding it
        holder: String,
    },
    /// A pending request between two users who already list each other.
    PendingBetweenFriends {
        /// Request identifier
        request_id: RequestId,
        /// Sending user
        sender: String,
        /// Receiving user
        receiver: String,
    },
}

/// Result of one audit pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    /// Relationship records read
    pub records_scanned: usize,
    /// Everything found, in a stable order
    pub violations: Vec<Violation>,
}

impl AuditReport {
    /// True when no violation was found
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// What a repair pass did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairOutcome {
    /// Description of each repair applied
    pub applied: Vec<String>,
    /// Audit taken after repairing
    pub after: AuditReport,
}

/// Finds and repairs inconsistent relationship records.
pub struct ConsistencyAuditor {
    store: Arc<dyn DocumentStore>,
}

impl ConsistencyAuditor {
    /// Auditor over `store`
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Scan every relationship record.
    pub async fn audit(&self) -> Result<AuditReport> {
        let docs = self.store.list(collections::RELATIONSHIPS).await?;
        let records: BTreeMap<String, RelationshipRecord> = docs
            .iter()
            .map(|doc| (doc.key.clone(), RelationshipRecord::from_fields(&doc.fields)))
            .collect();

        let report = AuditReport {
            records_scanned: records.len(),
            violations: find_violations(&records),
        };

        for violation in &report.violations {
            tracing::warn!(?violation, "Relationship inconsistency");
        }
        tracing::info!(
            records = report.records_scanned,
            violations = report.violations.len(),
            "Audit complete"
        );
        Ok(report)
    }

    /// Writes that fix each violation in `report`.
    pub fn plan(report: &AuditReport) -> Vec<Repair> {
        report.violations.iter().map(plan_one).collect()
    }

    /// Audit, apply every planned repair, then audit again.
    pub async fn repair(&self) -> Result<RepairOutcome> {
        let report = self.audit().await?;
        let mut applied = Vec::new();

        for repair in Self::plan(&report) {
            for write in &repair.writes {
                self.store.apply(write.clone()).await?;
            }
            tracing::info!("Repaired: {}", repair.description);
            applied.push(repair.description);
        }

        let after = self.audit().await?;
        Ok(RepairOutcome { applied, after })
    }
}

fn find_violations(records: &BTreeMap<String, RelationshipRecord>) -> Vec<Violation> {
    let empty = RelationshipRecord::default();
    let record_of = |user: &str| records.get(user).unwrap_or(&empty);
    let mut violations = Vec::new();

    for (holder, record) in records {
        for friend in &record.friend_ids {
            if friend == holder || record_of(friend.as_str()).is_friend(holder) {
                continue;
            }
            let pending_request = record_of(friend.as_str())
                .pending_between(friend, holder)
                .map(|(id, _)| id.clone())
                .next();
            violations.push(Violation::AsymmetricFriendship {
                holder: holder.clone(),
                missing: friend.clone(),
                pending_request,
            });
        }
    }

    // (sender, receiver) -> every pending id either party holds
    let mut by_pair: BTreeMap<(String, String), BTreeSet<RequestId>> = BTreeMap::new();
    let mut between_friends: BTreeSet<RequestId> = BTreeSet::new();

    for (holder, record) in records {
        for (id, request) in &record.pending {
            if !request.involves(holder) {
                violations.push(Violation::MisfiledRequest {
                    request_id: id.clone(),
                    holder: holder.clone(),
                });
                continue;
            }

            let other = request.counterpart(holder);
            let mutual = record.is_friend(other) && record_of(other).is_friend(holder);
            if mutual && request.status == RequestStatus::Pending {
                if between_friends.insert(id.clone()) {
                    violations.push(Violation::PendingBetweenFriends {
                        request_id: id.clone(),
                        sender: request.sender_id.clone(),
                        receiver: request.receiver_id.clone(),
                    });
                }
                continue;
            }

            if request.status == RequestStatus::Pending {
                by_pair
                    .entry((request.sender_id.clone(), request.receiver_id.clone()))
                    .or_default()
                    .insert(id.clone());
            }

            match record_of(other).pending.get(id) {
                None => violations.push(Violation::OrphanedRequest {
                    request_id: id.clone(),
                    request: request.clone(),
                    present_in: holder.clone(),
                    missing_from: other.to_string(),
                }),
                Some(copy) if copy != request && *holder == request.sender_id => {
                    violations.push(Violation::MismatchedRequest {
                        request_id: id.clone(),
                        sender_copy: request.clone(),
                        receiver_copy: copy.clone(),
                    });
                }
                Some(_) => {}
            }
        }
    }

    for ((sender, receiver), ids) in by_pair {
        if ids.len() < 2 {
            continue;
        }
        let mut request_ids: Vec<RequestId> = ids.into_iter().collect();
        request_ids.sort_by_key(|id| {
            let created = id
                .parts(Some(sender.as_str()))
                .map(|parts| parts.created_at_millis)
                .unwrap_or(i64::MAX);
            (created, id.clone())
        });
        violations.push(Violation::DuplicatePending {
            sender,
            receiver,
            request_ids,
        });
    }

    violations
}

fn plan_one(violation: &Violation) -> Repair {
    match violation {
        Violation::AsymmetricFriendship {
            holder,
            missing,
            pending_request: Some(request_id),
        } => Repair {
            description: format!("finish accept of {} between {} and {}", request_id, missing, holder),
            writes: vec![update(
                missing,
                vec![
                    FieldOp::array_union(FRIEND_IDS_FIELD, holder),
                    FieldOp::delete(pending_path(request_id)),
                ],
            )],
        },
        Violation::AsymmetricFriendship {
            holder,
            missing,
            pending_request: None,
        } => Repair {
            description: format!("drop one-sided friend {} from {}", missing, holder),
            writes: vec![update(holder, drop_friend_ops(missing))],
        },
        Violation::OrphanedRequest {
            request_id,
            present_in,
            ..
        } => Repair {
            description: format!("delete orphaned request {} from {}", request_id, present_in),
            writes: vec![update(present_in, vec![FieldOp::delete(pending_path(request_id))])],
        },
        Violation::MismatchedRequest {
            request_id,
            sender_copy,
            ..
        } => {
            let value = serde_json::to_value(sender_copy).unwrap_or_default();
            Repair {
                description: format!("copy request {} to {}", request_id, sender_copy.receiver_id),
                writes: vec![update(
                    &sender_copy.receiver_id,
                    vec![FieldOp::set(pending_path(request_id), value)],
                )],
            }
        }
        Violation::DuplicatePending {
            sender,
            receiver,
            request_ids,
        } => {
            let mut writes = Vec::new();
            for id in request_ids.iter().skip(1) {
                writes.push(update(sender, vec![FieldOp::delete(pending_path(id))]));
                writes.push(update(receiver, vec![FieldOp::delete(pending_path(id))]));
            }
            Repair {
                description: format!(
                    "keep oldest of {} requests from {} to {}",
                    request_ids.len(),
                    sender,
                    receiver
                ),
                writes,
            }
        }
        Violation::MisfiledRequest { request_id, holder } => Repair {
            description: format!("delete misfiled request {} from {}", request_id, holder),
            writes: vec![update(holder, vec![FieldOp::delete(pending_path(request_id))])],
        },
        Violation::PendingBetweenFriends {
            request_id,
            sender,
            receiver,
        } => Repair {
            description: format!(
                "delete request {} between friends {} and {}",
                request_id, sender, receiver
            ),
            writes: vec![
                update(sender, vec![FieldOp::delete(pending_path(request_id))]),
                update(receiver, vec![FieldOp::delete(pending_path(request_id))]),
            ],
        },
    }
}

fn update(user: &str, ops: Vec<FieldOp>) -> Write {
    Write::Update {
        collection: collections::RELATIONSHIPS.to_string(),
        key: user.to_string(),
        ops,
        missing_ok: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoreConfig, WriteMode};
    use crate::friends::{ConfirmChoice, PairState, RelationshipService};
    use crate::storage::document::into_fields;
    use crate::storage::testing::{FlakyStore, InterleavingStore};
    use crate::storage::MemoryStore;
    use crate::time::ManualClock;
    use serde_json::json;

    fn service_at(store: Arc<dyn DocumentStore>, millis: i64) -> RelationshipService {
        RelationshipService::with_clock(
            store,
            Arc::new(ManualClock::new(millis)),
            &CoreConfig {
                write_mode: WriteMode::Paired,
                ..CoreConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_clean_store() {
        let store = Arc::new(MemoryStore::new());
        let service = service_at(store.clone(), 1000);
        let id = service.send_friend_request("alice", "bob").await.unwrap();
        service.accept_request("bob", &id).await.unwrap();
        service.send_friend_request("carol", "alice").await.unwrap();

        let report = ConsistencyAuditor::new(store).audit().await.unwrap();
        assert_eq!(report.records_scanned, 3);
        assert!(report.is_clean(), "{:?}", report.violations);
    }

    #[tokio::test]
    async fn test_concurrent_sends_are_flagged_and_repaired() {
        let memory = Arc::new(MemoryStore::new());
        let racy: Arc<dyn DocumentStore> = Arc::new(InterleavingStore::new(memory.clone()));
        let phone = service_at(racy.clone(), 1000);
        let laptop = service_at(racy, 1001);

        let (first, second) = tokio::join!(
            phone.send_friend_request("alice", "bob"),
            laptop.send_friend_request("alice", "bob"),
        );
        let first = first.unwrap();
        let second = second.unwrap();
        assert_ne!(first, second);

        let auditor = ConsistencyAuditor::new(memory.clone());
        let report = auditor.audit().await.unwrap();
        assert_eq!(
            report.violations,
            vec![Violation::DuplicatePending {
                sender: "alice".into(),
                receiver: "bob".into(),
                request_ids: vec![first.clone(), second.clone()],
            }]
        );

        let outcome = auditor.repair().await.unwrap();
        assert_eq!(outcome.applied.len(), 1);
        assert!(outcome.after.is_clean());

        let service = service_at(memory, 2000);
        let bob = service.record("bob").await.unwrap();
        assert!(bob.pending.contains_key(&first));
        assert!(!bob.pending.contains_key(&second));
    }

    #[tokio::test]
    async fn test_half_applied_accept_is_completed() {
        let memory = Arc::new(MemoryStore::new());
        let flaky = Arc::new(FlakyStore::new(memory.clone()));
        let service = service_at(flaky.clone(), 1000);

        let id = service.send_friend_request("alice", "bob").await.unwrap();
        flaky.fail_writes_to("alice");
        assert!(service.accept_request("bob", &id).await.is_err());
        flaky.heal();

        let auditor = ConsistencyAuditor::new(memory);
        let report = auditor.audit().await.unwrap();
        assert!(report.violations.contains(&Violation::AsymmetricFriendship {
            holder: "bob".into(),
            missing: "alice".into(),
            pending_request: Some(id.clone()),
        }));

        let outcome = auditor.repair().await.unwrap();
        assert!(outcome.after.is_clean(), "{:?}", outcome.after.violations);
        assert_eq!(
            service.relationship_between("alice", "bob").await.unwrap(),
            PairState::Friends
        );
    }

    #[tokio::test]
    async fn test_half_applied_remove_is_finished() {
        let memory = Arc::new(MemoryStore::new());
        let flaky = Arc::new(FlakyStore::new(memory.clone()));
        let service = service_at(flaky.clone(), 1000);

        let id = service.send_friend_request("alice", "bob").await.unwrap();
        service.accept_request("bob", &id).await.unwrap();

        flaky.fail_writes_to("bob");
        assert!(service
            .remove_friend("alice", "bob", &ConfirmChoice::Confirm)
            .await
            .is_err());
        flaky.heal();

        let outcome = ConsistencyAuditor::new(memory).repair().await.unwrap();
        assert_eq!(outcome.applied.len(), 1);
        assert!(outcome.after.is_clean());
        assert_eq!(
            service.relationship_between("alice", "bob").await.unwrap(),
            PairState::None
        );
    }

    #[tokio::test]
    async fn test_orphaned_misfiled_and_mismatched_entries() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_merge(
                collections::RELATIONSHIPS,
                "alice",
                into_fields(json!({
                    "pending": {
                        "alice_bob_1": { "senderId": "alice", "receiverId": "bob", "status": "pending" },
                        "alice_carol_2": { "senderId": "alice", "receiverId": "carol", "status": "pending" },
                        "dave_erin_3": { "senderId": "dave", "receiverId": "erin", "status": "pending" },
                    }
                }))
                .unwrap(),
            )
            .await
            .unwrap();
        store
            .set_merge(
                collections::RELATIONSHIPS,
                "carol",
                into_fields(json!({
                    "pending": {
                        "alice_carol_2": { "senderId": "alice", "receiverId": "carol", "status": "accepted" },
                    }
                }))
                .unwrap(),
            )
            .await
            .unwrap();

        let auditor = ConsistencyAuditor::new(store.clone());
        let report = auditor.audit().await.unwrap();
        assert_eq!(report.violations.len(), 3);
        assert!(report.violations.iter().any(|v| matches!(
            v,
            Violation::OrphanedRequest { missing_from, .. } if missing_from == "bob"
        )));
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, Violation::MisfiledRequest { holder, .. } if holder == "alice")));
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, Violation::MismatchedRequest { .. })));

        let outcome = auditor.repair().await.unwrap();
        assert_eq!(outcome.applied.len(), 3);
        assert!(outcome.after.is_clean(), "{:?}", outcome.after.violations);
    }

    async fn seed(store: &MemoryStore, user: &str, body: serde_json::Value) {
        store
            .set_merge(collections::RELATIONSHIPS, user, into_fields(body).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pending_between_friends_is_cleared() {
        let store = Arc::new(MemoryStore::new());
        let stale = json!({
            "bob_alice_5": { "senderId": "bob", "receiverId": "alice", "status": "pending" }
        });
        seed(&store, "alice", json!({ "friendIds": ["bob"], "pending": stale.clone() })).await;
        seed(&store, "bob", json!({ "friendIds": ["alice"], "pending": stale })).await;

        let auditor = ConsistencyAuditor::new(store.clone());
        let report = auditor.audit().await.unwrap();
        assert_eq!(
            report.violations,
            vec![Violation::PendingBetweenFriends {
                request_id: RequestId::new("bob_alice_5"),
                sender: "bob".into(),
                receiver: "alice".into(),
            }]
        );

        let outcome = auditor.repair().await.unwrap();
        assert!(outcome.after.is_clean(), "{:?}", outcome.after.violations);

        let service = service_at(store, 2000);
        assert!(service.record("alice").await.unwrap().pending.is_empty());
        assert!(service.record("bob").await.unwrap().pending.is_empty());
        assert_eq!(
            service.relationship_between("alice", "bob").await.unwrap(),
            PairState::Friends
        );
    }

    #[tokio::test]
    async fn test_one_sided_legacy_friend_is_dropped() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, "alice", json!({ "friends": ["bob"], "friendsId": ["bob"] })).await;
        seed(&store, "bob", json!({ "friendIds": [] })).await;

        let auditor = ConsistencyAuditor::new(store.clone());
        let outcome = auditor.repair().await.unwrap();
        assert_eq!(outcome.applied.len(), 1);
        assert!(outcome.after.is_clean(), "{:?}", outcome.after.violations);

        let service = service_at(store, 2000);
        assert!(service.record("alice").await.unwrap().friend_ids.is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_ordered_by_embedded_time() {
        let store = Arc::new(MemoryStore::new());
        let pending = json!({
            "user_a_user_b_20": { "senderId": "user_a", "receiverId": "user_b", "status": "pending" },
            "user_a_user_b_3": { "senderId": "user_a", "receiverId": "user_b", "status": "pending" },
        });
        seed(&store, "user_a", json!({ "pending": pending.clone() })).await;
        seed(&store, "user_b", json!({ "pending": pending })).await;

        let report = ConsistencyAuditor::new(store).audit().await.unwrap();
        assert_eq!(
            report.violations,
            vec![Violation::DuplicatePending {
                sender: "user_a".into(),
                receiver: "user_b".into(),
                request_ids: vec![
                    RequestId::new("user_a_user_b_3"),
                    RequestId::new("user_a_user_b_20"),
                ],
            }]
        );
    }
}
