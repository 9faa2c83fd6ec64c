//! SQLite-backed feed store.
//!
//! [`Database`] owns the `feeds` and `feed_items` tables. Every operation is
//! self-contained (one statement or one transaction) and publishes a
//! [`StoreChange`] after it commits, which the query layer turns into fresh
//! snapshots.

mod feeds;
mod items;
mod schema;
mod types;

pub use schema::Database;
pub use types::{DatabaseError, Feed, FeedItem, StoreChange};
