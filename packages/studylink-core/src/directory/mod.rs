//! # Directory
//!
//! User lookup and prefix search over the `users` collection.
//!
//! ## Search
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         USER SEARCH                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   "  Ali "  ──trim──►  "Ali"  ──len < min_chars?──►  []                │
//! │                          │                                              │
//! │                     lower-case                                          │
//! │                          ▼                                              │
//! │                        "ali"                                            │
//! │              ┌───────────┴───────────┐                                  │
//! │              ▼                       ▼                                  │
//! │   username ∈ [ali, ali\u{f8ff}]   email ∈ [ali, ali\u{f8ff}]            │
//! │              │                       │                                  │
//! │              └─────── merge by userId (username hit wins) ──┐          │
//! │                                                              ▼          │
//! │                               drop acting user, sort by username        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stored values are compared as-is, so a username with capitals will not
//! match a lower-cased fragment.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use crate::config::CoreConfig;
use crate::error::Result;
use crate::storage::document::into_fields;
use crate::storage::{collections, DocumentStore, FieldOp};

mod profile;

pub use profile::{username_from_email, UserProfile, UNKNOWN_EMAIL, UNKNOWN_USERNAME};

/// Name used when neither username nor email is known
pub const FALLBACK_DISPLAY_NAME: &str = "User";

/// Profile lookup and search.
pub struct DirectoryService {
    store: Arc<dyn DocumentStore>,
    min_chars: usize,
}

impl DirectoryService {
    /// Create a directory over `store`.
    pub fn new(store: Arc<dyn DocumentStore>, config: &CoreConfig) -> Self {
        Self {
            store,
            min_chars: config.search_min_chars,
        }
    }

    /// Find users whose username or email starts with `fragment`.
    pub async fn search(&self, acting_user: &str, fragment: &str) -> Result<Vec<UserProfile>> {
        let trimmed = fragment.trim();
        if trimmed.chars().count() < self.min_chars {
            return Ok(Vec::new());
        }
        let prefix = trimmed.to_lowercase();

        let by_username = self
            .store
            .query_prefix(collections::USERS, "username", &prefix)
            .await?;
        let by_email = self
            .store
            .query_prefix(collections::USERS, "email", &prefix)
            .await?;

        let mut merged: BTreeMap<String, UserProfile> = BTreeMap::new();
        for doc in &by_username {
            merged
                .entry(doc.key.clone())
                .or_insert_with(|| UserProfile::from_document(doc));
        }
        for doc in &by_email {
            merged
                .entry(doc.key.clone())
                .or_insert_with(|| UserProfile::from_document(doc));
        }
        merged.remove(acting_user);

        let mut results: Vec<UserProfile> = merged.into_values().collect();
        results.sort_by(|a, b| {
            a.username
                .cmp(&b.username)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });

        tracing::debug!(
            query = %prefix,
            username_hits = by_username.len(),
            email_hits = by_email.len(),
            results = results.len(),
            "Directory search"
        );
        Ok(results)
    }

    /// Fetch a profile. Absent users are `None`.
    pub async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self
            .store
            .get(collections::USERS, user_id)
            .await?
            .map(|doc| UserProfile::from_document(&doc)))
    }

    /// Fetch a profile, or the "Unknown User" placeholder.
    pub async fn profile_or_unknown(&self, user_id: &str) -> Result<UserProfile> {
        Ok(self
            .get_profile(user_id)
            .await?
            .unwrap_or_else(|| UserProfile::unknown(user_id)))
    }

    /// Create the profile written at sign-up.
    ///
    /// The username is the lower-cased local part of the email. Registering
    /// again only refreshes the email; username, image and creation time
    /// are kept.
    pub async fn register_profile(&self, user_id: &str, email: &str) -> Result<UserProfile> {
        let existing = self.store.get(collections::USERS, user_id).await?;
        let fields = match existing {
            Some(_) => into_fields(json!({ "userId": user_id, "email": email }))?,
            None => into_fields(json!({
                "userId": user_id,
                "email": email,
                "username": username_from_email(email),
                "profileImage": "",
                "createdAt": crate::time::now_timestamp_millis(),
            }))?,
        };
        self.store
            .set_merge(collections::USERS, user_id, fields)
            .await?;

        let profile = self.profile_or_unknown(user_id).await?;
        tracing::info!(user = %user_id, username = %profile.username, "Profile registered");
        Ok(profile)
    }

    /// Change a user's username. The profile must exist.
    pub async fn update_username(&self, user_id: &str, username: &str) -> Result<()> {
        self.store
            .update(
                collections::USERS,
                user_id,
                vec![FieldOp::set("username", json!(username))],
            )
            .await?;
        tracing::info!(user = %user_id, username = %username, "Username updated");
        Ok(())
    }

    /// Name to greet a user by: username, else email, else "User".
    pub async fn display_name(&self, user_id: &str, fallback_email: Option<&str>) -> Result<String> {
        let profile = self.get_profile(user_id).await?;
        let username = profile
            .as_ref()
            .map(|p| p.username.as_str())
            .filter(|name| *name != UNKNOWN_USERNAME);
        let email = profile
            .as_ref()
            .map(|p| p.email.as_str())
            .filter(|email| *email != UNKNOWN_EMAIL)
            .or(fallback_email.filter(|e| !e.is_empty()));

        Ok(username
            .or(email)
            .unwrap_or(FALLBACK_DISPLAY_NAME)
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::MemoryStore;

    async fn seeded() -> (Arc<MemoryStore>, DirectoryService) {
        let store = Arc::new(MemoryStore::new());
        let directory = DirectoryService::new(store.clone(), &CoreConfig::default());
        for (id, email) in [
            ("u1", "alice@uni.edu"),
            ("u2", "alan@uni.edu"),
            ("u3", "bob@uni.edu"),
            ("me", "alison@uni.edu"),
        ] {
            directory.register_profile(id, email).await.unwrap();
        }
        (store, directory)
    }

    #[tokio::test]
    async fn test_search_matches_prefix_and_excludes_self() {
        let (_, directory) = seeded().await;

        let results = directory.search("me", "  ALI ").await.unwrap();
        let names: Vec<_> = results.iter().map(|p| p.username.as_str()).collect();
        assert_eq!(names, vec!["alice"]);

        let results = directory.search("u3", "ali").await.unwrap();
        let ids: Vec<_> = results.iter().map(|p| p.user_id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "me"]);
    }

    #[tokio::test]
    async fn test_short_fragment_returns_nothing() {
        let (_, directory) = seeded().await;
        assert!(directory.search("me", "al").await.unwrap().is_empty());
        assert!(directory.search("me", "   ").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_username_hit_wins_over_email_hit() {
        let store = Arc::new(MemoryStore::new());
        let directory = DirectoryService::new(store.clone(), &CoreConfig::default());
        store
            .set_merge(
                collections::USERS,
                "u9",
                into_fields(json!({ "username": "carol", "email": "carol@uni.edu" })).unwrap(),
            )
            .await
            .unwrap();

        let results = directory.search("me", "car").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].username, "carol");
        assert_eq!(results[0].email, "carol@uni.edu");
    }

    #[tokio::test]
    async fn test_display_name_fallbacks() {
        let (store, directory) = seeded().await;
        assert_eq!(directory.display_name("u1", None).await.unwrap(), "alice");
        assert_eq!(
            directory.display_name("ghost", Some("ghost@uni.edu")).await.unwrap(),
            "ghost@uni.edu"
        );
        assert_eq!(directory.display_name("ghost", None).await.unwrap(), "User");

        store
            .set_merge(collections::USERS, "u7", into_fields(json!({ "email": "x@y.z" })).unwrap())
            .await
            .unwrap();
        assert_eq!(directory.display_name("u7", None).await.unwrap(), "x@y.z");
    }

    #[tokio::test]
    async fn test_update_username() {
        let (_, directory) = seeded().await;
        directory.update_username("u3", "bobby").await.unwrap();
        assert_eq!(directory.get_profile("u3").await.unwrap().unwrap().username, "bobby");

        let missing = directory.update_username("ghost", "x").await;
        assert!(matches!(missing, Err(Error::DocumentNotFound { .. })));
    }

    #[tokio::test]
    async fn test_register_again_keeps_username_and_image() {
        let (store, directory) = seeded().await;
        directory.update_username("u3", "bobby").await.unwrap();
        store
            .update(
                collections::USERS,
                "u3",
                vec![FieldOp::set("profileImage", json!("https://img/bob.png"))],
            )
            .await
            .unwrap();

        let profile = directory.register_profile("u3", "bob@uni.edu").await.unwrap();
        assert_eq!(profile.username, "bobby");
        assert_eq!(profile.profile_image.as_deref(), Some("https://img/bob.png"));
        assert_eq!(profile.email, "bob@uni.edu");
    }
}
