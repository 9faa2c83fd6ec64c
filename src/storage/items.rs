use anyhow::Result;
use sqlx::{QueryBuilder, Sqlite, Transaction};
use std::collections::BTreeSet;

use super::schema::Database;
use super::types::{FeedItem, StoreChange};

/// Rows per INSERT statement. 8 columns x 100 rows stays well under SQLite's
/// bound-parameter limit.
const BATCH_SIZE: usize = 100;

/// Full-row replace: flags come from the incoming row.
const REPLACE_ON_CONFLICT: &str = r#" ON CONFLICT(guid) DO UPDATE SET
    feed_url = excluded.feed_url,
    title = excluded.title,
    link = excluded.link,
    description = excluded.description,
    pub_date = excluded.pub_date,
    is_read = excluded.is_read,
    is_saved = excluded.is_saved"#;

/// Content replace: stored flags survive.
const KEEP_FLAGS_ON_CONFLICT: &str = r#" ON CONFLICT(guid) DO UPDATE SET
    feed_url = excluded.feed_url,
    title = excluded.title,
    link = excluded.link,
    description = excluded.description,
    pub_date = excluded.pub_date"#;

const ITEM_COLUMNS: &str =
    "guid, feed_url, title, link, description, pub_date, is_read, is_saved";

impl Database {
    // ========================================================================
    // Item Operations
    // ========================================================================

    /// Batch insert-or-replace items keyed by GUID, all in one transaction.
    ///
    /// A colliding GUID gets every column from the incoming row, including
    /// `is_read` and `is_saved`.
    pub async fn upsert_items(&self, items: &[FeedItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let previous = insert_batches(&mut tx, items, REPLACE_ON_CONFLICT).await?;
        tx.commit().await?;

        self.notify_items(
            items
                .iter()
                .map(|i| i.feed_url.as_str())
                .chain(previous.iter().map(String::as_str)),
        );
        Ok(())
    }

    /// Like [`upsert_items`](Self::upsert_items), but a colliding GUID keeps
    /// its stored read/saved flags.
    pub async fn upsert_items_preserving_flags(&self, items: &[FeedItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let previous = insert_batches(&mut tx, items, KEEP_FLAGS_ON_CONFLICT).await?;
        tx.commit().await?;

        self.notify_items(
            items
                .iter()
                .map(|i| i.feed_url.as_str())
                .chain(previous.iter().map(String::as_str)),
        );
        Ok(())
    }

    /// Atomically swap the item set of `feed_url` for `items`.
    pub async fn replace_items(&self, feed_url: &str, items: &[FeedItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM feed_items WHERE feed_url = ?")
            .bind(feed_url)
            .execute(&mut *tx)
            .await?;
        let previous = insert_batches(&mut tx, items, REPLACE_ON_CONFLICT).await?;

        tx.commit().await?;

        self.notify_items(
            std::iter::once(feed_url)
                .chain(items.iter().map(|i| i.feed_url.as_str()))
                .chain(previous.iter().map(String::as_str)),
        );
        Ok(())
    }

    /// Items of one feed, newest `pub_date` string first.
    ///
    /// The comparison is byte-lexicographic on the stored text, not a date
    /// comparison.
    pub async fn items_for_feed(&self, feed_url: &str) -> Result<Vec<FeedItem>> {
        let items = sqlx::query_as::<_, FeedItem>(
            r#"
            SELECT guid, feed_url, title, link, description, pub_date, is_read, is_saved
            FROM feed_items
            WHERE feed_url = ?
            ORDER BY pub_date DESC, rowid DESC
        "#,
        )
        .bind(feed_url)
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    /// Saved items across all feeds, same ordering as `items_for_feed`.
    pub async fn saved_items(&self) -> Result<Vec<FeedItem>> {
        let items = sqlx::query_as::<_, FeedItem>(
            r#"
            SELECT guid, feed_url, title, link, description, pub_date, is_read, is_saved
            FROM feed_items
            WHERE is_saved = 1
            ORDER BY pub_date DESC, rowid DESC
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(items)
    }

    pub async fn get_item(&self, guid: &str) -> Result<Option<FeedItem>> {
        let item = sqlx::query_as::<_, FeedItem>(
            r#"
            SELECT guid, feed_url, title, link, description, pub_date, is_read, is_saved
            FROM feed_items
            WHERE guid = ?
        "#,
        )
        .bind(guid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(item)
    }

    /// Replace every non-key column of the item with the same GUID.
    ///
    /// Returns false if no such item exists; nothing is inserted.
    pub async fn update_item(&self, item: &FeedItem) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let previous: Option<String> =
            sqlx::query_scalar("SELECT feed_url FROM feed_items WHERE guid = ?")
                .bind(&item.guid)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(previous) = previous else {
            return Ok(false);
        };

        sqlx::query(
            r#"
            UPDATE feed_items SET
                feed_url = ?,
                title = ?,
                link = ?,
                description = ?,
                pub_date = ?,
                is_read = ?,
                is_saved = ?
            WHERE guid = ?
        "#,
        )
        .bind(&item.feed_url)
        .bind(&item.title)
        .bind(&item.link)
        .bind(&item.description)
        .bind(&item.pub_date)
        .bind(item.is_read)
        .bind(item.is_saved)
        .bind(&item.guid)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        // Moving an item to another feed changes both listings
        self.notify_items([previous.as_str(), item.feed_url.as_str()].into_iter());
        Ok(true)
    }

    /// Remove all items of a feed, leaving the feed row. Returns rows removed.
    pub async fn delete_items(&self, feed_url: &str) -> Result<u64> {
        let removed = sqlx::query("DELETE FROM feed_items WHERE feed_url = ?")
            .bind(feed_url)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if removed > 0 {
            self.notify(StoreChange::Items {
                feed_url: feed_url.to_string(),
            });
        }
        Ok(removed)
    }

    /// One notification per distinct feed URL.
    fn notify_items<'a>(&self, urls: impl Iterator<Item = &'a str>) {
        let distinct: BTreeSet<&str> = urls.collect();
        for url in distinct {
            self.notify(StoreChange::Items {
                feed_url: url.to_string(),
            });
        }
    }
}

/// Insert `items` in chunks. Returns the feed URLs that colliding GUIDs
/// belonged to before the write.
async fn insert_batches(
    tx: &mut Transaction<'_, Sqlite>,
    items: &[FeedItem],
    on_conflict: &str,
) -> Result<Vec<String>> {
    let mut previous = Vec::new();
    for chunk in items.chunks(BATCH_SIZE) {
        let mut owners: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT DISTINCT feed_url FROM feed_items WHERE guid IN (");
        let mut guids = owners.separated(", ");
        for item in chunk {
            guids.push_bind(&item.guid);
        }
        owners.push(")");
        let urls: Vec<String> = owners
            .build_query_scalar::<String>()
            .fetch_all(&mut **tx)
            .await?;
        previous.extend(urls);

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("INSERT INTO feed_items ({ITEM_COLUMNS}) "));

        builder.push_values(chunk, |mut b, item| {
            b.push_bind(&item.guid)
                .push_bind(&item.feed_url)
                .push_bind(&item.title)
                .push_bind(&item.link)
                .push_bind(&item.description)
                .push_bind(&item.pub_date)
                .push_bind(item.is_read)
                .push_bind(item.is_saved);
        });
        builder.push(on_conflict);

        builder.build().execute(&mut **tx).await?;
    }
    Ok(previous)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Feed;
    use pretty_assertions::assert_eq;

    const FEED: &str = "https://a.example/rss";

    fn item(guid: &str, pub_date: &str) -> FeedItem {
        FeedItem {
            guid: guid.to_string(),
            feed_url: FEED.to_string(),
            title: format!("Title {guid}"),
            link: format!("https://a.example/{guid}"),
            description: "Body".to_string(),
            pub_date: pub_date.to_string(),
            is_read: false,
            is_saved: false,
        }
    }

    async fn db_with_feed() -> Database {
        let db = Database::open(":memory:").await.unwrap();
        db.upsert_feed(&Feed {
            url: FEED.to_string(),
            title: "A".to_string(),
            description: "A feed".to_string(),
            last_updated: 0,
        })
        .await
        .unwrap();
        db
    }

    #[tokio::test]
    async fn test_upsert_and_read_back() {
        let db = db_with_feed().await;
        let i = item("g1", "2024-01-01");
        db.upsert_items(&[i.clone()]).await.unwrap();

        assert_eq!(db.items_for_feed(FEED).await.unwrap(), vec![i.clone()]);
        assert_eq!(db.get_item("g1").await.unwrap(), Some(i));
    }

    #[tokio::test]
    async fn test_upsert_empty_is_noop() {
        let db = db_with_feed().await;
        db.upsert_items(&[]).await.unwrap();
        assert!(db.items_for_feed(FEED).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_flags() {
        let db = db_with_feed().await;
        let mut i = item("g1", "2024-01-01");
        i.is_read = true;
        i.is_saved = true;
        db.upsert_items(&[i]).await.unwrap();

        db.upsert_items(&[item("g1", "2024-01-02")]).await.unwrap();

        let stored = db.get_item("g1").await.unwrap().unwrap();
        assert!(!stored.is_read);
        assert!(!stored.is_saved);
        assert_eq!(stored.pub_date, "2024-01-02");
    }

    #[tokio::test]
    async fn test_upsert_preserving_flags_keeps_flags() {
        let db = db_with_feed().await;
        let mut i = item("g1", "2024-01-01");
        i.is_read = true;
        i.is_saved = true;
        db.upsert_items(&[i]).await.unwrap();

        let mut changed = item("g1", "2024-01-02");
        changed.title = "Retitled".to_string();
        db.upsert_items_preserving_flags(&[changed]).await.unwrap();

        let stored = db.get_item("g1").await.unwrap().unwrap();
        assert!(stored.is_read);
        assert!(stored.is_saved);
        assert_eq!(stored.title, "Retitled");
    }

    #[tokio::test]
    async fn test_batch_larger_than_chunk() {
        let db = db_with_feed().await;
        let items: Vec<FeedItem> = (0..250)
            .map(|n| item(&format!("g{n:03}"), &format!("2024-01-{:02}", n % 28 + 1)))
            .collect();
        db.upsert_items(&items).await.unwrap();
        assert_eq!(db.items_for_feed(FEED).await.unwrap().len(), 250);
    }

    #[tokio::test]
    async fn test_duplicate_guids_in_one_batch_last_wins() {
        let db = db_with_feed().await;
        let mut second = item("g1", "2024-01-01");
        second.title = "Second".to_string();
        db.upsert_items(&[item("g1", "2024-01-01"), second])
            .await
            .unwrap();

        let items = db.items_for_feed(FEED).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Second");
    }

    #[tokio::test]
    async fn test_items_ordered_by_pub_date_string_desc() {
        let db = db_with_feed().await;
        // RFC 822 dates sort by weekday name, not chronology
        db.upsert_items(&[
            item("a", "Mon, 01 Jan 2024 00:00:00 GMT"),
            item("b", "Wed, 03 Jan 2024 00:00:00 GMT"),
            item("c", "Tue, 02 Jan 2024 00:00:00 GMT"),
        ])
        .await
        .unwrap();

        let guids: Vec<String> = db
            .items_for_feed(FEED)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.guid)
            .collect();
        assert_eq!(guids, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_saved_items_across_feeds() {
        let db = db_with_feed().await;
        let mut a = item("a", "2024-01-01");
        a.is_saved = true;
        let mut b = item("b", "2024-03-01");
        b.feed_url = "https://b.example/rss".to_string();
        b.is_saved = true;
        let c = item("c", "2024-02-01");
        db.upsert_items(&[a, b, c]).await.unwrap();

        let guids: Vec<String> = db
            .saved_items()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.guid)
            .collect();
        assert_eq!(guids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_orphan_items_are_accepted() {
        let db = Database::open(":memory:").await.unwrap();
        let mut orphan = item("o1", "2024-01-01");
        orphan.feed_url = "https://unknown.example/rss".to_string();
        db.upsert_items(&[orphan]).await.unwrap();
        assert!(db.get_item("o1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_item_replaces_row() {
        let db = db_with_feed().await;
        db.upsert_items(&[item("g1", "2024-01-01")]).await.unwrap();

        let mut updated = item("g1", "2024-01-01");
        updated.is_read = true;
        assert!(db.update_item(&updated).await.unwrap());
        assert_eq!(db.get_item("g1").await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn test_update_missing_item_returns_false() {
        let db = db_with_feed().await;
        assert!(!db.update_item(&item("missing", "x")).await.unwrap());
        assert!(db.get_item("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_items_keeps_feed() {
        let db = db_with_feed().await;
        db.upsert_items(&[item("g1", "1"), item("g2", "2")])
            .await
            .unwrap();

        assert_eq!(db.delete_items(FEED).await.unwrap(), 2);
        assert!(db.items_for_feed(FEED).await.unwrap().is_empty());
        assert!(db.get_feed(FEED).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_replace_items_swaps_set() {
        let db = db_with_feed().await;
        db.upsert_items(&[item("old1", "1"), item("old2", "2")])
            .await
            .unwrap();

        db.replace_items(FEED, &[item("new1", "3")]).await.unwrap();

        let guids: Vec<String> = db
            .items_for_feed(FEED)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.guid)
            .collect();
        assert_eq!(guids, vec!["new1"]);
    }

    #[tokio::test]
    async fn test_upsert_notifies_once_per_feed() {
        let db = db_with_feed().await;
        let mut rx = db.subscribe_changes();
        db.upsert_items(&[item("g1", "1"), item("g2", "2")])
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            StoreChange::Items {
                feed_url: FEED.to_string()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_moving_guid_notifies_both_feeds() {
        let db = db_with_feed().await;
        db.upsert_items(&[item("g1", "1")]).await.unwrap();

        let mut rx = db.subscribe_changes();
        let moved = FeedItem {
            feed_url: "https://b.example/rss".to_string(),
            ..item("g1", "1")
        };
        db.upsert_items(&[moved]).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(change) = rx.try_recv() {
            seen.push(change);
        }
        assert!(seen.iter().any(|c| c.touches_feed_items(FEED)));
        assert!(seen.iter().any(|c| c.touches_feed_items("https://b.example/rss")));
        assert!(db.items_for_feed(FEED).await.unwrap().is_empty());

        // Moving back through update_item names both feeds too
        db.update_item(&item("g1", "1")).await.unwrap();
        let mut seen = Vec::new();
        while let Ok(change) = rx.try_recv() {
            seen.push(change);
        }
        assert!(seen.iter().any(|c| c.touches_feed_items(FEED)));
        assert!(seen.iter().any(|c| c.touches_feed_items("https://b.example/rss")));
    }
}
