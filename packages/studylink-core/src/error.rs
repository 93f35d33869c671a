//! # Error Handling
//!
//! Error types for StudyLink Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Config Errors (100)                                               │
//! │  │   └── InvalidConfig         - Bad environment / flag value          │
//! │  │                                                                      │
//! │  ├── Storage Errors (400)                                              │
//! │  │   ├── DocumentNotFound      - update() on an absent document        │
//! │  │   ├── StorageCorrupted      - Document body is not a JSON object    │
//! │  │   └── DatabaseError         - SQLite failure                        │
//! │  │                                                                      │
//! │  ├── Backend Errors (500)                                              │
//! │  │   └── Backend               - Remote call failed                    │
//! │  │                                                                      │
//! │  ├── Friend Errors (600)                                               │
//! │  │   ├── CannotAddSelf / AlreadyFriends / RequestPending              │
//! │  │   ├── RequestNotFound / NotRequestReceiver                          │
//! │  │   └── PartialWrite          - One half of a paired write landed     │
//! │  │                                                                      │
//! │  └── Internal Errors (900)                                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing in this crate treats an error as fatal. Callers surface errors to
//! the user as a dismissible [`Notice`] and keep running.

use thiserror::Error;

use crate::friends::Repair;

/// Result type alias for StudyLink Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for StudyLink Core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors (100-199)
    // ========================================================================

    /// A configuration value could not be parsed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================

    /// An update targeted a document that does not exist
    #[error("Document not found: {collection}/{key}")]
    DocumentNotFound {
        /// Collection name
        collection: String,
        /// Document key
        key: String,
    },

    /// Stored data could not be interpreted
    #[error("Data corruption detected: {0}")]
    StorageCorrupted(String),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    // ========================================================================
    // Backend Errors (500-599)
    // ========================================================================

    /// The document backend rejected or failed the call
    #[error("Backend error: {0}")]
    Backend(String),

    // ========================================================================
    // Friend Errors (600-699)
    // ========================================================================

    /// Already friends with this user
    #[error("Already friends with this user.")]
    AlreadyFriends,

    /// Friend request already pending
    #[error("Friend request already sent to this user.")]
    RequestPending,

    /// Friend request not found
    #[error("Friend request not found.")]
    RequestNotFound,

    /// Only the receiver can accept a request
    #[error("Only the receiver of a friend request can accept it.")]
    NotRequestReceiver,

    /// Cannot send request to self
    #[error("Cannot send a friend request to yourself.")]
    CannotAddSelf,

    /// Request identifier could not be parsed
    #[error("Invalid request identifier: {0}")]
    InvalidRequestId(String),

    /// A previous change from this session has not been saved yet
    #[error("Another change is still being saved.")]
    Busy,

    /// The first write of a paired operation landed and the second did not.
    ///
    /// `repair` holds the write that was not applied; replaying it is
    /// idempotent.
    #[error("{operation} was applied to {completed} but not to {failed}: {source}")]
    PartialWrite {
        /// Protocol operation name
        operation: &'static str,
        /// User whose record was written
        completed: String,
        /// User whose record was not written
        failed: String,
        /// The missing half-write
        repair: Box<Repair>,
        /// Why the second write failed
        source: Box<Error>,
    },

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// Numeric error code, grouped by category:
    /// - 100-199: Configuration
    /// - 400-499: Storage
    /// - 500-599: Backend
    /// - 600-699: Friends
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            Error::InvalidConfig(_) => 100,

            Error::DocumentNotFound { .. } => 403,
            Error::StorageCorrupted(_) => 404,
            Error::DatabaseError(_) => 405,

            Error::Backend(_) => 500,

            Error::AlreadyFriends => 600,
            Error::RequestPending => 602,
            Error::RequestNotFound => 603,
            Error::NotRequestReceiver => 604,
            Error::CannotAddSelf => 606,
            Error::InvalidRequestId(_) => 607,
            Error::Busy => 608,
            Error::PartialWrite { .. } => 610,

            Error::Internal(_) => 900,
            Error::SerializationError(_) => 902,
        }
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors can be resolved by retrying, or for partial
    /// writes by replaying the missing half.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Backend(_)
                | Error::PartialWrite { .. }
                | Error::Busy
        )
    }

    /// The missing half-write carried by a [`Error::PartialWrite`].
    pub fn repair(&self) -> Option<&Repair> {
        match self {
            Error::PartialWrite { repair, .. } => Some(repair),
            _ => None,
        }
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

// ============================================================================
// USER-FACING NOTICE
// ============================================================================

/// A dismissible notification built from an [`Error`].
///
/// The title follows the app's alert wording: most failures read
/// "Error", a duplicate request reads "Already Sent".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Numeric error code
    pub code: i32,
    /// Alert title
    pub title: String,
    /// Human-readable error message
    pub message: String,
    /// Whether retrying may help
    pub recoverable: bool,
}

impl From<&Error> for Notice {
    fn from(err: &Error) -> Self {
        let title = match err {
            Error::RequestPending => "Already Sent",
            Error::AlreadyFriends => "Already Friends",
            Error::PartialWrite { .. } => "Partially Saved",
            _ => "Error",
        };
        Self {
            code: err.code(),
            title: title.to_string(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
        }
    }
}

impl From<Error> for Notice {
    fn from(err: Error) -> Self {
        Notice::from(&err)
    }
}

// ============================================================================
// TESTS
// ============================================================================
