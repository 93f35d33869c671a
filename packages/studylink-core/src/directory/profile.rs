//! # User Profile
//!
//! The `users` document as the protocol sees it.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  users/{userId}                                                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  userId        String                                          │
//! │  username      String   missing → "Unknown User"               │
//! │  email         String   missing → "No email"                   │
//! │  profileImage  String?  "" → None                              │
//! │  createdAt     i64      unix millis, set at registration       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use serde_json::Value;

use crate::storage::{Document, Fields};

/// Shown when a profile has no username
pub const UNKNOWN_USERNAME: &str = "Unknown User";

/// Shown when a profile has no email
pub const UNKNOWN_EMAIL: &str = "No email";

/// A user's public profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Document key
    pub user_id: String,
    /// Lower-case handle
    pub username: String,
    /// Email address
    pub email: String,
    /// Profile image URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

impl UserProfile {
    /// Build from a stored document, filling in display defaults.
    pub fn from_document(document: &Document) -> Self {
        Self::from_fields(&document.key, &document.fields)
    }

    /// Build from a document body.
    pub fn from_fields(user_id: &str, fields: &Fields) -> Self {
        let text = |name: &str| {
            fields
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            user_id: user_id.to_string(),
            username: text("username").unwrap_or_else(|| UNKNOWN_USERNAME.to_string()),
            email: text("email").unwrap_or_else(|| UNKNOWN_EMAIL.to_string()),
            profile_image: text("profileImage"),
        }
    }

    /// Placeholder for a user with no profile document.
    pub fn unknown(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            username: UNKNOWN_USERNAME.to_string(),
            email: UNKNOWN_EMAIL.to_string(),
            profile_image: None,
        }
    }
}

/// Username derived from an email at sign-up: the local part, lower-cased.
pub fn username_from_email(email: &str) -> String {
    email
        .split('@')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase()
}
