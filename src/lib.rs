//! feedpipe: fetch RSS feeds, repair and parse them, and keep the results in
//! a local SQLite store that readers can subscribe to.

pub mod config;
pub mod feed;
pub mod query;
pub mod reader;
pub mod storage;

pub use reader::Reader;
