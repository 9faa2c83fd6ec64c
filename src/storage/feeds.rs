use anyhow::Result;

use super::schema::Database;
use super::types::{Feed, StoreChange};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert a feed or fully replace the row with the same URL.
    ///
    /// Uses ON CONFLICT DO UPDATE rather than INSERT OR REPLACE so the row
    /// keeps its rowid (list position) and the delete trigger does not fire.
    pub async fn upsert_feed(&self, feed: &Feed) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO feeds (url, title, description, last_updated)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                last_updated = excluded.last_updated
        "#,
        )
        .bind(&feed.url)
        .bind(&feed.title)
        .bind(&feed.description)
        .bind(feed.last_updated)
        .execute(&self.pool)
        .await?;

        self.notify(StoreChange::Feeds);
        Ok(())
    }

    /// All feeds, most recently added first.
    pub async fn list_feeds(&self) -> Result<Vec<Feed>> {
        let feeds = sqlx::query_as::<_, Feed>(
            r#"
            SELECT url, title, description, last_updated
            FROM feeds
            ORDER BY rowid DESC
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(feeds)
    }

    pub async fn get_feed(&self, url: &str) -> Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>(
            "SELECT url, title, description, last_updated FROM feeds WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(feed)
    }

    /// Delete a feed and all of its items.
    ///
    /// Returns the number of items removed. Deleting an unknown URL is a no-op
    /// returning 0. Items are counted and removed in the same transaction as
    /// the feed row; the `feeds_cascade_items` trigger also covers items
    /// written concurrently for the URL.
    pub async fn delete_feed(&self, url: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM feed_items WHERE feed_url = ?")
            .bind(url)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let feed_rows = sqlx::query("DELETE FROM feeds WHERE url = ?")
            .bind(url)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        if feed_rows > 0 {
            self.notify(StoreChange::Feeds);
        }
        if removed > 0 {
            self.notify(StoreChange::Items {
                feed_url: url.to_string(),
            });
        }
        tracing::debug!(feed = %url, items = removed, "Deleted feed");
        Ok(removed)
    }
}
