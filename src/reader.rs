//! The surface a presentation layer talks to: ingest and curate feeds, and
//! subscribe to the three live views.

use anyhow::Result;

use crate::feed::{Fetch, IngestError, Ingestor, RefreshOutcome, RefreshPolicy};
use crate::query::{FeedQueries, Subscription};
use crate::storage::{Database, Feed, FeedItem};

pub struct Reader<F> {
    ingestor: Ingestor<F>,
    queries: FeedQueries,
}

impl<F: Fetch> Reader<F> {
    pub fn new(db: Database, fetcher: F) -> Self {
        Self {
            queries: FeedQueries::new(db.clone()),
            ingestor: Ingestor::new(db, fetcher),
        }
    }

    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.ingestor = self.ingestor.with_policy(policy);
        self
    }

    fn db(&self) -> &Database {
        self.ingestor.database()
    }

    /// Add or refresh one feed.
    pub async fn ingest(&self, feed_url: &str) -> Result<(), IngestError> {
        self.ingestor.ingest(feed_url).await
    }

    pub async fn refresh_all(&self, concurrency: usize) -> Result<Vec<RefreshOutcome>> {
        self.ingestor.refresh_all(concurrency).await
    }

    /// Remove a feed and all of its items. Unknown URLs are a no-op.
    pub async fn delete_feed(&self, feed_url: &str) -> Result<()> {
        let removed = self.db().delete_feed(feed_url).await?;
        tracing::info!(feed = %feed_url, items = removed, "Feed deleted");
        Ok(())
    }

    pub async fn item(&self, guid: &str) -> Result<Option<FeedItem>> {
        self.db().get_item(guid).await
    }

    /// Flip `is_saved` and write the item back. Returns the stored version.
    pub async fn toggle_saved(&self, item: &FeedItem) -> Result<FeedItem> {
        let updated = FeedItem {
            is_saved: !item.is_saved,
            ..item.clone()
        };
        if !self.db().update_item(&updated).await? {
            anyhow::bail!("Item not found: {}", item.guid);
        }
        tracing::debug!(guid = %item.guid, saved = updated.is_saved, "Toggled saved");
        Ok(updated)
    }

    /// Set `is_read`. Already-read items are returned without a write.
    pub async fn mark_read(&self, item: &FeedItem) -> Result<FeedItem> {
        if item.is_read {
            return Ok(item.clone());
        }
        let updated = FeedItem {
            is_read: true,
            ..item.clone()
        };
        if !self.db().update_item(&updated).await? {
            anyhow::bail!("Item not found: {}", item.guid);
        }
        Ok(updated)
    }

    pub async fn feeds(&self) -> Result<Subscription<Feed>> {
        self.queries.feeds().await
    }

    pub async fn items_for_feed(&self, feed_url: &str) -> Result<Subscription<FeedItem>> {
        self.queries.items_for_feed(feed_url).await
    }

    pub async fn saved_items(&self) -> Result<Subscription<FeedItem>> {
        self.queries.saved_items().await
    }
}
