use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use super::fetcher::{Fetch, FetchError};
use super::parser::{self, ParsedItem};
use super::sanitize::sanitize;
use crate::storage::{Database, Feed, FeedItem};

const UNNAMED_FEED: &str = "Unnamed Feed";
const NO_FEED_DESCRIPTION: &str = "No description";
const UNTITLED_ITEM: &str = "Untitled";
const NO_ITEM_DESCRIPTION: &str = "No description available";
const UNKNOWN_DATE: &str = "Unknown date";

/// Every way an ingest can fail, each with a message fit for the user.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("Feed not found: {url}")]
    NotFound { url: String },

    #[error("Access denied to feed: {url}")]
    Forbidden { url: String },

    /// Any 5xx status
    #[error("Server error ({status}) for feed: {url}")]
    ServerError { status: u16, url: String },

    #[error("Failed to fetch feed ({status}): {url}")]
    OtherHttpStatus { status: u16, url: String },

    #[error("Empty response body from {url}")]
    EmptyResponse { url: String },

    #[error("Malformed feed: {0}")]
    MalformedFeed(String),

    #[error("Cannot connect to server. Check internet connection.")]
    NetworkUnreachable,

    #[error("Connection timeout. Please try again.")]
    Timeout,

    /// Storage failures and uncategorized network errors
    #[error("{0}")]
    Unknown(String),
}

impl IngestError {
    fn from_status(status: u16, url: &str) -> Self {
        let url = url.to_string();
        match status {
            404 => IngestError::NotFound { url },
            403 => IngestError::Forbidden { url },
            500..=599 => IngestError::ServerError { status, url },
            _ => IngestError::OtherHttpStatus { status, url },
        }
    }

    fn storage(err: anyhow::Error) -> Self {
        IngestError::Unknown(format!("Database error: {err}"))
    }
}

impl From<FetchError> for IngestError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Connect(_) => IngestError::NetworkUnreachable,
            FetchError::Timeout => IngestError::Timeout,
            FetchError::ResponseTooLarge => {
                IngestError::Unknown("Network error: response too large".to_string())
            }
            FetchError::Request(message) => IngestError::Unknown(format!("Network error: {message}")),
        }
    }
}

/// How a refresh reconciles fetched items with stored ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Replace colliding items wholesale. Read/saved flags reset to false.
    #[default]
    Upsert,
    /// Replace colliding items' content but keep their read/saved flags.
    PreserveFlags,
    /// Drop the feed's stored items and insert the fetched set, atomically.
    ReplaceItems,
}

/// Outcome of one feed in [`Ingestor::refresh_all`].
#[derive(Debug)]
pub struct RefreshOutcome {
    pub url: String,
    pub result: Result<(), IngestError>,
}

/// Fetch → sanitize → parse → store, for one feed URL at a time.
///
/// Adding a feed and refreshing it are the same operation. Nothing is retried.
/// The feed row and the item batch are committed separately, so a failure or
/// cancellation between the two leaves new feed metadata over the previous
/// items. Concurrent ingests of the same URL are not coordinated; the last
/// writer wins.
pub struct Ingestor<F> {
    db: Database,
    fetcher: F,
    policy: RefreshPolicy,
}

impl<F: Fetch> Ingestor<F> {
    pub fn new(db: Database, fetcher: F) -> Self {
        Self {
            db,
            fetcher,
            policy: RefreshPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Ingest `feed_url`, creating the feed on first success.
    ///
    /// # Errors
    ///
    /// - [`IngestError::NotFound`], [`IngestError::Forbidden`],
    ///   [`IngestError::ServerError`], [`IngestError::OtherHttpStatus`] for
    ///   non-2xx responses
    /// - [`IngestError::EmptyResponse`] for a blank body
    /// - [`IngestError::MalformedFeed`] if the body is not a parseable RSS feed
    /// - [`IngestError::NetworkUnreachable`] / [`IngestError::Timeout`] for
    ///   transport failures
    /// - [`IngestError::Unknown`] for storage and other failures
    ///
    /// The store is untouched by every error raised before the feed upsert.
    pub async fn ingest(&self, feed_url: &str) -> Result<(), IngestError> {
        match self.run(feed_url).await {
            Ok(items) => {
                tracing::info!(feed = %feed_url, items, "Feed ingested");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(feed = %feed_url, error = %e, "Feed ingest failed");
                Err(e)
            }
        }
    }

    async fn run(&self, feed_url: &str) -> Result<usize, IngestError> {
        let response = self.fetcher.fetch(feed_url).await?;

        if !(200..300).contains(&response.status) {
            return Err(IngestError::from_status(response.status, feed_url));
        }

        let body = String::from_utf8_lossy(&response.body);
        if body.trim().is_empty() {
            return Err(IngestError::EmptyResponse {
                url: feed_url.to_string(),
            });
        }

        let document = parser::parse(&sanitize(&body), feed_url)
            .map_err(|e| IngestError::MalformedFeed(e.to_string()))?;

        let feed = Feed {
            url: feed_url.to_string(),
            title: or_placeholder(document.title, UNNAMED_FEED),
            description: or_placeholder(document.description, NO_FEED_DESCRIPTION),
            last_updated: chrono::Utc::now().timestamp_millis(),
        };
        self.db.upsert_feed(&feed).await.map_err(IngestError::storage)?;

        let items: Vec<FeedItem> = document
            .items
            .into_iter()
            .map(|item| to_feed_item(item, feed_url))
            .collect();

        let stored = match self.policy {
            RefreshPolicy::Upsert => self.db.upsert_items(&items).await,
            RefreshPolicy::PreserveFlags => self.db.upsert_items_preserving_flags(&items).await,
            RefreshPolicy::ReplaceItems => self.db.replace_items(feed_url, &items).await,
        };
        stored.map_err(IngestError::storage)?;

        Ok(items.len())
    }

    /// Re-ingest every stored feed, at most `concurrency` at a time.
    ///
    /// Results arrive in completion order. Fails only if the feed list itself
    /// cannot be read.
    pub async fn refresh_all(&self, concurrency: usize) -> Result<Vec<RefreshOutcome>> {
        let feeds = self.db.list_feeds().await?;
        if feeds.is_empty() {
            return Ok(Vec::new());
        }

        let outcomes: Vec<RefreshOutcome> = stream::iter(feeds)
            .map(|feed| async move {
                let result = self.ingest(&feed.url).await;
                RefreshOutcome {
                    url: feed.url,
                    result,
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        tracing::info!(feeds = outcomes.len(), failed, "Refresh complete");
        Ok(outcomes)
    }
}

fn or_placeholder(value: String, placeholder: &str) -> String {
    if value.is_empty() {
        placeholder.to_string()
    } else {
        value
    }
}

/// GUID falls back to the link, then to a random UUID. Items without either
/// therefore get a new row on every ingest.
fn to_feed_item(item: ParsedItem, feed_url: &str) -> FeedItem {
    let guid = if !item.guid.is_empty() {
        item.guid
    } else if !item.link.is_empty() {
        item.link.clone()
    } else {
        Uuid::new_v4().to_string()
    };

    FeedItem {
        guid,
        feed_url: feed_url.to_string(),
        title: or_placeholder(item.title, UNTITLED_ITEM),
        link: item.link,
        description: or_placeholder(item.description, NO_ITEM_DESCRIPTION),
        pub_date: or_placeholder(item.pub_date, UNKNOWN_DATE),
        is_read: false,
        is_saved: false,
    }
}
