//! Feed ingestion: fetching, repairing, parsing and storing RSS feeds.
//!
//! - [`sanitize`] - Best-effort repair of dirty XML, independent of the parser
//! - [`parser`] - Non-strict RSS parsing into a [`FeedDocument`]
//! - [`fetcher`] - The [`Fetch`] capability and its reqwest implementation
//! - [`ingest`] - The [`Ingestor`] tying the steps together over the store
//!
//! # Example
//!
//! ```ignore
//! use feedpipe::feed::{HttpFetcher, Ingestor, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT};
//!
//! let fetcher = HttpFetcher::new(DEFAULT_USER_AGENT, DEFAULT_TIMEOUT)?;
//! let ingestor = Ingestor::new(db, fetcher);
//! ingestor.ingest("https://blog.rust-lang.org/feed.xml").await?;
//! ```

pub mod fetcher;
pub mod ingest;
pub mod parser;
pub mod sanitize;

pub use fetcher::{
    Fetch, FetchError, FetchResponse, HttpFetcher, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT,
};
pub use ingest::{IngestError, Ingestor, RefreshOutcome, RefreshPolicy};
pub use parser::{parse, FeedDocument, ParseError, ParsedItem};
pub use sanitize::sanitize;
