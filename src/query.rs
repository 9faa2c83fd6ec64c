//! Push-style read access over the feed store.
//!
//! Each subscription reads its query once up front, then re-runs it in a
//! background task whenever the store reports a change that could affect it,
//! publishing every fresh snapshot on a [`tokio::sync::watch`] channel.
//! Snapshots are owned values; nothing is shared with the store.

use anyhow::Result;
use futures::future::BoxFuture;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::storage::{Database, Feed, FeedItem, StoreChange};

/// A live query result. Dropping it stops the background refresh.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: watch::Receiver<Vec<T>>,
    task: JoinHandle<()>,
}

impl<T: Clone> Subscription<T> {
    /// The most recent snapshot.
    pub fn current(&self) -> Vec<T> {
        self.rx.borrow().clone()
    }

    /// Wait for the next snapshot. Returns `None` once the store has shut
    /// down and no further snapshots will arrive.
    pub async fn changed(&mut self) -> Option<Vec<T>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Subscription factory for the three read models a reader UI needs.
#[derive(Clone)]
pub struct FeedQueries {
    db: Database,
}

impl FeedQueries {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// All feeds, re-read on every feed write.
    pub async fn feeds(&self) -> Result<Subscription<Feed>> {
        subscribe(
            &self.db,
            "feeds",
            |change| matches!(change, StoreChange::Feeds),
            |db| Box::pin(async move { db.list_feeds().await }),
        )
        .await
    }

    /// Items of one feed, re-read when that feed's items change.
    pub async fn items_for_feed(&self, feed_url: &str) -> Result<Subscription<FeedItem>> {
        let filter_url = feed_url.to_string();
        let query_url = feed_url.to_string();
        subscribe(
            &self.db,
            "items_for_feed",
            move |change| change.touches_feed_items(&filter_url),
            move |db| {
                let url = query_url.clone();
                Box::pin(async move { db.items_for_feed(&url).await })
            },
        )
        .await
    }

    /// Saved items across all feeds, re-read on any item write.
    pub async fn saved_items(&self) -> Result<Subscription<FeedItem>> {
        subscribe(
            &self.db,
            "saved_items",
            StoreChange::touches_items,
            |db| Box::pin(async move { db.saved_items().await }),
        )
        .await
    }
}

async fn subscribe<T, P, Q>(db: &Database, name: &'static str, relevant: P, query: Q) -> Result<Subscription<T>>
where
    T: Send + Sync + 'static,
    P: Fn(&StoreChange) -> bool + Send + 'static,
    Q: Fn(Database) -> BoxFuture<'static, Result<Vec<T>>> + Send + 'static,
{
    // Subscribe before the first read so no write can slip in between
    let mut changes = db.subscribe_changes();
    let initial = query(db.clone()).await?;
    let (tx, rx) = watch::channel(initial);
    let db = db.clone();

    let task = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) if !relevant(&change) => continue,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(query = name, skipped, "Change stream lagged, re-reading");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }

            match query(db.clone()).await {
                Ok(snapshot) => {
                    if tx.send(snapshot).is_err() {
                        break; // Subscription dropped
                    }
                }
                Err(e) => {
                    tracing::warn!(query = name, error = %e, "Re-query failed, keeping previous snapshot");
                }
            }
        }
    });

    Ok(Subscription { rx, task })
}
