//! Relationship protocol operations.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use super::{
    drop_friend_ops, ConfirmChoice, ConfirmPrompt, Confirmation, FriendRequest, PairState,
    RelationshipRecord, RemoveOutcome, Repair, RequestId, RequestStatus, FRIEND_IDS_FIELD,
    PENDING_FIELD,
};
use crate::config::{CoreConfig, WriteMode};
use crate::directory::{DirectoryService, UserProfile};
use crate::error::{Error, Result};
use crate::storage::document::into_fields;
use crate::storage::{collections, DocumentStore, FieldOp, Write};
use crate::time::{Clock, SystemClock};

/// A request addressed to the acting user, with the sender's profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingRequest {
    /// Request identifier
    pub request_id: RequestId,
    /// The stored request
    pub request: FriendRequest,
    /// Who sent it
    pub sender: UserProfile,
}

/// A request the acting user sent, with the receiver's profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingRequest {
    /// Request identifier
    pub request_id: RequestId,
    /// The stored request
    pub request: FriendRequest,
    /// Who it was sent to
    pub receiver: UserProfile,
}

/// Send, accept, reject and remove over two relationship records.
///
/// Every operation takes the acting user explicitly and writes the acting
/// user's record first.
pub struct RelationshipService {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    write_mode: WriteMode,
    // Names in confirmation prompts
    directory: DirectoryService,
}

impl RelationshipService {
    /// Service on the wall clock
    pub fn new(store: Arc<dyn DocumentStore>, config: &CoreConfig) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), config)
    }

    /// Service with an injected clock
    pub fn with_clock(
        store: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            directory: DirectoryService::new(store.clone(), config),
            store,
            clock,
            write_mode: config.write_mode,
        }
    }

    /// Configured write mode
    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Read a user's relationship record. Absent reads as empty.
    pub async fn record(&self, user_id: &str) -> Result<RelationshipRecord> {
        Ok(self.load(user_id).await?.0)
    }

    async fn load(&self, user_id: &str) -> Result<(RelationshipRecord, bool)> {
        let doc = self.store.get(collections::RELATIONSHIPS, user_id).await?;
        Ok((RelationshipRecord::from_document(doc.as_ref()), doc.is_some()))
    }

    // ========================================================================
    // OPERATIONS
    // ========================================================================

    /// Send a friend request from `sender` to `receiver`.
    ///
    /// The same entry is merged into `pending` on both records.
    pub async fn send_friend_request(&self, sender: &str, receiver: &str) -> Result<RequestId> {
        if sender == receiver {
            return Err(Error::CannotAddSelf);
        }

        let sender_record = self.record(sender).await?;
        if sender_record.is_friend(receiver) {
            return Err(Error::AlreadyFriends);
        }
        if sender_record.has_pending(sender, receiver) {
            return Err(Error::RequestPending);
        }

        let request_id = RequestId::generate(sender, receiver, self.clock.now_millis());
        let request = FriendRequest::pending(sender, receiver);

        let mut pending = serde_json::Map::new();
        pending.insert(request_id.to_string(), request.to_value()?);
        let fields = into_fields(json!({ PENDING_FIELD: Value::Object(pending) }))?;

        self.write_pair(
            "send_friend_request",
            Write::SetMerge {
                collection: collections::RELATIONSHIPS.to_string(),
                key: sender.to_string(),
                fields: fields.clone(),
            },
            Write::SetMerge {
                collection: collections::RELATIONSHIPS.to_string(),
                key: receiver.to_string(),
                fields,
            },
        )
        .await?;

        tracing::info!(sender = %sender, receiver = %receiver, request_id = %request_id, "Friend request sent");
        Ok(request_id)
    }

    /// Accept a request addressed to `actor`.
    ///
    /// Every other pending entry between the pair, in either direction, is
    /// deleted with it.
    pub async fn accept_request(&self, actor: &str, request_id: &RequestId) -> Result<FriendRequest> {
        let (actor_record, request) = self.pending_request(actor, request_id).await?;
        if request.receiver_id != actor {
            return Err(Error::NotRequestReceiver);
        }

        let sender = request.sender_id.as_str();
        let (sender_record, sender_exists) = self.load(sender).await?;

        let mut settled: BTreeSet<RequestId> = BTreeSet::new();
        settled.insert(request_id.clone());
        for record in [&actor_record, &sender_record] {
            let between = record
                .pending_between(sender, actor)
                .chain(record.pending_between(actor, sender));
            settled.extend(between.map(|(id, _)| id.clone()));
        }
        if settled.len() > 1 {
            tracing::debug!(actor = %actor, sender = %sender, count = settled.len(), "Clearing other pending requests between the pair");
        }

        self.write_pair(
            "accept_request",
            befriend(actor, sender, &settled, true),
            befriend(sender, actor, &settled, sender_exists),
        )
        .await?;

        tracing::info!(receiver = %actor, sender = %sender, request_id = %request_id, "Friend request accepted");
        Ok(request)
    }

    /// Drop a pending request from both records.
    ///
    /// The receiver rejects; the sender withdraws. Both are the same two
    /// deletions.
    pub async fn reject_request(&self, actor: &str, request_id: &RequestId) -> Result<FriendRequest> {
        let (_, request) = self.pending_request(actor, request_id).await?;
        if !request.involves(actor) {
            return Err(Error::NotRequestReceiver);
        }
        let other = request.counterpart(actor).to_string();

        self.write_pair(
            "reject_request",
            drop_pending(actor, request_id, false),
            drop_pending(&other, request_id, true),
        )
        .await?;

        tracing::info!(actor = %actor, other = %other, request_id = %request_id, "Friend request rejected");
        Ok(request)
    }

    /// Unfriend after the user confirms.
    ///
    /// Calling it again once unfriended is a no-op.
    pub async fn remove_friend(
        &self,
        actor: &str,
        friend: &str,
        confirmation: &dyn Confirmation,
    ) -> Result<RemoveOutcome> {
        if actor == friend {
            return Ok(RemoveOutcome::NotFriends);
        }

        let (actor_record, actor_exists) = self.load(actor).await?;
        let (friend_record, friend_exists) = self.load(friend).await?;
        if !actor_record.is_friend(friend) && !friend_record.is_friend(actor) {
            tracing::debug!(actor = %actor, friend = %friend, "Remove skipped, not friends");
            return Ok(RemoveOutcome::NotFriends);
        }

        let name = self.directory.display_name(friend, None).await?;
        let prompt = ConfirmPrompt::remove_friend(&name);
        if confirmation.confirm(&prompt).await == ConfirmChoice::Cancel {
            tracing::debug!(actor = %actor, friend = %friend, "Remove cancelled");
            return Ok(RemoveOutcome::Cancelled);
        }

        self.write_pair(
            "remove_friend",
            unfriend(actor, friend, !actor_exists),
            unfriend(friend, actor, !friend_exists),
        )
        .await?;

        tracing::info!(actor = %actor, friend = %friend, "Friend removed");
        Ok(RemoveOutcome::Removed)
    }

    /// Replay the missing half of a [`Error::PartialWrite`].
    pub async fn retry_repair(&self, repair: &Repair) -> Result<()> {
        for write in &repair.writes {
            self.store.apply(write.clone()).await?;
        }
        tracing::info!(writes = repair.writes.len(), "Repair applied: {}", repair.description);
        Ok(())
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Relationship between `a` and `b`, cross-checked against both records.
    pub async fn relationship_between(&self, a: &str, b: &str) -> Result<PairState> {
        let ra = self.record(a).await?;
        let rb = self.record(b).await?;

        match (ra.is_friend(b), rb.is_friend(a)) {
            (true, true) => return Ok(PairState::Friends),
            (true, false) => {
                return Ok(PairState::Inconsistent {
                    detail: format!("{} lists {} as a friend but not the reverse", a, b),
                })
            }
            (false, true) => {
                return Ok(PairState::Inconsistent {
                    detail: format!("{} lists {} as a friend but not the reverse", b, a),
                })
            }
            (false, false) => {}
        }

        let between = |record: &RelationshipRecord| -> Vec<(RequestId, FriendRequest)> {
            record
                .pending_between(a, b)
                .chain(record.pending_between(b, a))
                .map(|(id, r)| (id.clone(), r.clone()))
                .collect()
        };
        let mut in_a = between(&ra);
        let mut in_b = between(&rb);
        in_a.sort_by(|x, y| x.0.cmp(&y.0));
        in_b.sort_by(|x, y| x.0.cmp(&y.0));

        if in_a != in_b {
            let detail = in_a
                .iter()
                .find(|entry| !in_b.contains(entry))
                .map(|(id, _)| format!("request {} is missing from {}", id, b))
                .or_else(|| {
                    in_b.iter()
                        .find(|entry| !in_a.contains(entry))
                        .map(|(id, _)| format!("request {} is missing from {}", id, a))
                })
                .unwrap_or_else(|| "pending maps differ".to_string());
            return Ok(PairState::Inconsistent { detail });
        }

        Ok(in_a
            .iter()
            .min_by_key(|(id, _)| id.created_at_millis().unwrap_or(i64::MAX))
            .map(|(_, request)| PairState::Pending {
                sender: request.sender_id.clone(),
            })
            .unwrap_or(PairState::None))
    }

    /// Requests waiting on `actor`, joined with sender profiles.
    ///
    /// Requests from senders with no profile are left out.
    pub async fn incoming_requests(
        &self,
        actor: &str,
        directory: &DirectoryService,
    ) -> Result<Vec<IncomingRequest>> {
        let record = self.record(actor).await?;
        let mut requests = Vec::new();
        for (id, request) in record.incoming(actor) {
            match directory.get_profile(&request.sender_id).await? {
                Some(sender) => requests.push(IncomingRequest {
                    request_id: id.clone(),
                    request: request.clone(),
                    sender,
                }),
                None => {
                    tracing::debug!(request_id = %id, sender = %request.sender_id, "Skipping request from unknown sender");
                }
            }
        }
        Ok(requests)
    }

    /// Requests `actor` sent that are still pending.
    pub async fn outgoing_requests(
        &self,
        actor: &str,
        directory: &DirectoryService,
    ) -> Result<Vec<OutgoingRequest>> {
        let record = self.record(actor).await?;
        let mut requests = Vec::new();
        for (id, request) in record.outgoing(actor) {
            requests.push(OutgoingRequest {
                request_id: id.clone(),
                request: request.clone(),
                receiver: directory.profile_or_unknown(&request.receiver_id).await?,
            });
        }
        Ok(requests)
    }

    /// `actor`'s friends with their profiles.
    pub async fn friends(&self, actor: &str, directory: &DirectoryService) -> Result<Vec<UserProfile>> {
        let record = self.record(actor).await?;
        let lookups = record
            .friend_ids
            .iter()
            .map(|id| directory.profile_or_unknown(id));
        futures::future::try_join_all(lookups).await
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    async fn pending_request(
        &self,
        actor: &str,
        request_id: &RequestId,
    ) -> Result<(RelationshipRecord, FriendRequest)> {
        let record = self.record(actor).await?;
        let request = record
            .pending
            .get(request_id)
            .filter(|r| r.status == RequestStatus::Pending)
            .cloned()
            .ok_or(Error::RequestNotFound)?;
        Ok((record, request))
    }

    /// Apply the two writes of one operation according to the write mode.
    async fn write_pair(&self, operation: &'static str, first: Write, second: Write) -> Result<()> {
        match self.write_mode {
            WriteMode::Atomic => self.store.commit_batch(vec![first, second]).await,
            WriteMode::Paired => {
                let completed = first.key().to_string();
                self.store.apply(first).await?;

                let failed = second.key().to_string();
                let repair = Repair {
                    description: format!("complete {} on {}", operation, failed),
                    writes: vec![second.clone()],
                };
                self.store.apply(second).await.map_err(|source| {
                    tracing::warn!(
                        operation,
                        completed = %completed,
                        failed = %failed,
                        "Second write failed: {}",
                        source
                    );
                    Error::PartialWrite {
                        operation,
                        completed,
                        failed,
                        repair: Box::new(repair),
                        source: Box::new(source),
                    }
                })
            }
        }
    }
}

/// `user` gains `friend` and loses the settled pending entries.
fn befriend(user: &str, friend: &str, settled: &BTreeSet<RequestId>, exists: bool) -> Write {
    if exists {
        let mut ops = vec![FieldOp::array_union(FRIEND_IDS_FIELD, friend)];
        ops.extend(settled.iter().map(|id| FieldOp::delete(pending_path(id))));
        Write::Update {
            collection: collections::RELATIONSHIPS.to_string(),
            key: user.to_string(),
            ops,
            missing_ok: false,
        }
    } else {
        let mut fields = serde_json::Map::new();
        fields.insert(FRIEND_IDS_FIELD.to_string(), json!([friend]));
        Write::SetMerge {
            collection: collections::RELATIONSHIPS.to_string(),
            key: user.to_string(),
            fields,
        }
    }
}

fn drop_pending(user: &str, request_id: &RequestId, missing_ok: bool) -> Write {
    Write::Update {
        collection: collections::RELATIONSHIPS.to_string(),
        key: user.to_string(),
        ops: vec![FieldOp::delete(pending_path(request_id))],
        missing_ok,
    }
}

fn unfriend(user: &str, friend: &str, missing_ok: bool) -> Write {
    Write::Update {
        collection: collections::RELATIONSHIPS.to_string(),
        key: user.to_string(),
        ops: drop_friend_ops(friend),
        missing_ok,
    }
}

pub(crate) fn pending_path(request_id: &RequestId) -> String {
    format!("{}.{}", PENDING_FIELD, request_id)
}
