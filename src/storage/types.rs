use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds a lock on the database file
    #[error("The feed database is locked by another process. Please close it and try again.")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::Locked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface
/// through the error text only.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Change Notifications
// ============================================================================

/// Emitted by [`Database`](super::Database) after every committed write.
///
/// Subscribers use it to decide whether a query they hold could have changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// A feed row was inserted, replaced or deleted.
    Feeds,
    /// Items belonging to `feed_url` were inserted, replaced, updated or deleted.
    Items { feed_url: String },
}

impl StoreChange {
    /// True if the change could alter the items listed for `url`.
    pub fn touches_feed_items(&self, url: &str) -> bool {
        matches!(self, StoreChange::Items { feed_url } if feed_url == url)
    }

    pub fn touches_items(&self) -> bool {
        matches!(self, StoreChange::Items { .. })
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed, keyed by its source URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Feed {
    pub url: String,
    pub title: String,
    pub description: String,
    /// Unix milliseconds of the last successful ingest
    pub last_updated: i64,
}

/// One entry of a feed, keyed by GUID.
///
/// `pub_date` is stored exactly as the feed published it; ordering on it is a
/// plain string comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct FeedItem {
    pub guid: String,
    pub feed_url: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub pub_date: String,
    pub is_read: bool,
    pub is_saved: bool,
}
