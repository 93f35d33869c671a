//! # Friends Session
//!
//! One signed-in user's cached view of their relationship record.
//!
//! ```text
//! ┌──────────────┐   begin(change)   ┌────────────────────────┐
//! │ FriendsSession│ ───────────────► │ Optimistic<Record>     │
//! └──────┬───────┘                   │  committed │ pending   │
//!        │ service call              └────────────────────────┘
//!        ▼                                   ▲
//!   Ok / PartialWrite ── commit ─────────────┤
//!   any other error  ── rollback ────────────┘
//! ```
//!
//! A partial write still commits: the acting user's own record is always
//! written first, so the cache matches it. A send that only half landed is
//! re-keyed with the id carried by the missing write.

use std::sync::Arc;

use parking_lot::RwLock;

use super::{
    Confirmation, FriendRequest, Optimistic, RelationshipRecord, RelationshipService,
    RemoveOutcome, RequestId, PENDING_FIELD,
};
use crate::error::{Error, Result};
use crate::storage::Write;

/// Cached relationship state for one user.
pub struct FriendsSession {
    user_id: String,
    service: Arc<RelationshipService>,
    state: RwLock<Optimistic<RelationshipRecord>>,
}

impl FriendsSession {
    /// Session with an empty cache
    pub fn new(user_id: impl Into<String>, service: Arc<RelationshipService>) -> Self {
        Self {
            user_id: user_id.into(),
            service,
            state: RwLock::new(Optimistic::default()),
        }
    }

    /// Session with the cache loaded from the store
    pub async fn open(user_id: impl Into<String>, service: Arc<RelationshipService>) -> Result<Self> {
        let session = Self::new(user_id, service);
        session.refresh().await?;
        Ok(session)
    }

    /// The signed-in user
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Reload from the store, dropping any staged change.
    pub async fn refresh(&self) -> Result<()> {
        let record = self.service.record(&self.user_id).await?;
        self.state.write().reset(record);
        Ok(())
    }

    /// What the user currently sees
    pub fn snapshot(&self) -> RelationshipRecord {
        self.state.read().current().clone()
    }

    /// True while a change awaits the store
    pub fn is_busy(&self) -> bool {
        self.state.read().is_pending()
    }

    /// Friend ids
    pub fn friends(&self) -> Vec<String> {
        self.state.read().current().friend_ids.clone()
    }

    /// Requests waiting on this user
    pub fn incoming(&self) -> Vec<(RequestId, FriendRequest)> {
        let state = self.state.read();
        state
            .current()
            .incoming(&self.user_id)
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect()
    }

    /// True when this user has a pending request to `other`
    pub fn has_sent_request_to(&self, other: &str) -> bool {
        self.state.read().current().has_pending(&self.user_id, other)
    }

    /// Send a request, refusing locally when one is already pending.
    pub async fn send_request(&self, receiver: &str) -> Result<RequestId> {
        if self.has_sent_request_to(receiver) {
            return Err(Error::RequestPending);
        }

        let me = self.user_id.clone();
        let provisional = RequestId::generate(&me, receiver, 0);
        self.stage(|record| {
            record
                .pending
                .insert(provisional.clone(), FriendRequest::pending(&me, receiver));
        })?;

        let result = self.service.send_friend_request(&self.user_id, receiver).await;

        let mut state = self.state.write();
        let stored_id = match &result {
            Ok(id) => Some(id.clone()),
            Err(err @ Error::PartialWrite { .. }) => sent_request_id(err),
            Err(e) => {
                tracing::warn!(user = %self.user_id, receiver = %receiver, "Send failed, rolling back: {}", e);
                state.rollback();
                return result;
            }
        };

        state.commit();
        if let Some(id) = stored_id {
            let mut record = state.committed().clone();
            if let Some(request) = record.pending.remove(&provisional) {
                record.pending.insert(id, request);
            }
            state.reset(record);
        }
        result
    }

    /// Accept a request addressed to this user.
    pub async fn accept(&self, request_id: &RequestId) -> Result<FriendRequest> {
        let me = self.user_id.clone();
        let cached = self.state.read().current().pending.get(request_id).cloned();
        self.stage(|record| {
            record.pending.remove(request_id);
            if let Some(request) = &cached {
                if request.receiver_id == me {
                    let sender = request.sender_id.as_str();
                    record.pending.retain(|_, r| !(r.involves(&me) && r.involves(sender)));
                    if !record.is_friend(sender) {
                        record.friend_ids.push(sender.to_string());
                    }
                }
            }
        })?;

        let result = self.service.accept_request(&self.user_id, request_id).await;
        self.settle(&result, "accept");
        result
    }

    /// Reject (or withdraw) a request.
    pub async fn reject(&self, request_id: &RequestId) -> Result<FriendRequest> {
        self.stage(|record| {
            record.pending.remove(request_id);
        })?;

        let result = self.service.reject_request(&self.user_id, request_id).await;
        self.settle(&result, "reject");
        result
    }

    /// Unfriend after confirmation.
    pub async fn remove_friend(
        &self,
        friend: &str,
        confirmation: &dyn Confirmation,
    ) -> Result<RemoveOutcome> {
        self.stage(|record| record.friend_ids.retain(|f| f != friend))?;

        let result = self
            .service
            .remove_friend(&self.user_id, friend, confirmation)
            .await;

        if let Ok(RemoveOutcome::Cancelled) = result {
            self.state.write().rollback();
        } else {
            self.settle(&result, "remove");
        }
        result
    }

    fn stage<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut RelationshipRecord),
    {
        if self.state.write().begin(change) {
            Ok(())
        } else {
            Err(Error::Busy)
        }
    }

    fn settle<T>(&self, result: &Result<T>, action: &str) {
        let mut state = self.state.write();
        match result {
            Ok(_) | Err(Error::PartialWrite { .. }) => state.commit(),
            Err(e) => {
                tracing::warn!(user = %self.user_id, action, "Change failed, rolling back: {}", e);
                state.rollback();
            }
        }
    }
}

/// Request id in the half of a send that did not land.
fn sent_request_id(err: &Error) -> Option<RequestId> {
    err.repair()?.writes.iter().find_map(|write| match write {
        Write::SetMerge { fields, .. } => fields
            .get(PENDING_FIELD)?
            .as_object()?
            .keys()
            .next()
            .map(|id| RequestId::new(id.clone())),
        _ => None,
    })
}
