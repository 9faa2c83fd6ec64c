use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

use feedpipe::config::Config;
use feedpipe::feed::HttpFetcher;
use feedpipe::storage::{Database, DatabaseError, Feed, FeedItem};
use feedpipe::Reader;

/// Get the config directory path (~/.config/feedpipe/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedpipe"))
}

/// Create the config directory with user-only permissions.
fn ensure_config_dir(config_dir: &Path) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match std::fs::metadata(config_dir) {
            Ok(metadata) => {
                let mut perms = metadata.permissions();
                perms.set_mode(0o700);
                if let Err(e) = std::fs::set_permissions(config_dir, perms) {
                    tracing::warn!(
                        path = %config_dir.display(),
                        error = %e,
                        "Failed to set config directory permissions to 0700"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to read config directory metadata"
                );
            }
        }
    }
    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "feedpipe", about = "Fetch RSS feeds into a local SQLite store")]
struct Args {
    /// Config file (default: ~/.config/feedpipe/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a feed and store it
    Add { url: String },
    /// Re-fetch one feed, or every stored feed
    Refresh { url: Option<String> },
    /// List stored feeds
    Feeds,
    /// List the items of a feed, newest first
    Items { url: String },
    /// List saved items across all feeds
    Saved,
    /// Delete a feed and its items
    Delete { url: String },
    /// Mark an item as read
    Read { guid: String },
    /// Toggle an item's saved flag
    Save { guid: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    ensure_config_dir(&config_dir)?;

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = config.database_path_in(&config_dir);
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::Locked) => {
            eprintln!("Error: Database is locked. Is another feedpipe process running?");
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("Failed to open database"),
    };

    let fetcher = HttpFetcher::new(&config.user_agent, config.fetch_timeout())
        .context("Failed to build HTTP client")?;
    let reader = Reader::new(db, fetcher).with_policy(config.refresh_policy);

    run(&reader, &config, args.command, args.json).await
}

async fn run(reader: &Reader<HttpFetcher>, config: &Config, command: Command, json: bool) -> Result<()> {
    match command {
        Command::Add { url } => {
            reader.ingest(&url).await?;
            println!("Added {url}");
        }
        Command::Refresh { url: Some(url) } => {
            reader.ingest(&url).await?;
            println!("Refreshed {url}");
        }
        Command::Refresh { url: None } => {
            let outcomes = reader.refresh_all(config.refresh_concurrency).await?;
            if json {
                let report: Vec<RefreshReport> = outcomes
                    .iter()
                    .map(|o| RefreshReport {
                        url: &o.url,
                        error: o.result.as_ref().err().map(ToString::to_string),
                    })
                    .collect();
                print_json(&report)?;
            } else {
                for outcome in &outcomes {
                    match &outcome.result {
                        Ok(()) => println!("ok    {}", outcome.url),
                        Err(e) => println!("error {}: {e}", outcome.url),
                    }
                }
                let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
                println!("Refreshed {} feeds, {failed} failed", outcomes.len());
            }
        }
        Command::Feeds => {
            let feeds = reader.feeds().await?.current();
            if json {
                print_json(&feeds)?;
            } else {
                print_feeds(&feeds);
            }
        }
        Command::Items { url } => {
            let items = reader.items_for_feed(&url).await?.current();
            if json {
                print_json(&items)?;
            } else {
                print_items(&items);
            }
        }
        Command::Saved => {
            let items = reader.saved_items().await?.current();
            if json {
                print_json(&items)?;
            } else {
                print_items(&items);
            }
        }
        Command::Delete { url } => {
            reader.delete_feed(&url).await?;
            println!("Deleted {url}");
        }
        Command::Read { guid } => {
            let item = find_item(reader, &guid).await?;
            reader.mark_read(&item).await?;
            println!("Marked read: {}", item.title);
        }
        Command::Save { guid } => {
            let item = find_item(reader, &guid).await?;
            let updated = reader.toggle_saved(&item).await?;
            let state = if updated.is_saved { "Saved" } else { "Unsaved" };
            println!("{state}: {}", updated.title);
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct RefreshReport<'a> {
    url: &'a str,
    error: Option<String>,
}

async fn find_item(reader: &Reader<HttpFetcher>, guid: &str) -> Result<FeedItem> {
    reader
        .item(guid)
        .await?
        .with_context(|| format!("No item with guid {guid}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_feeds(feeds: &[Feed]) {
    if feeds.is_empty() {
        println!("No feeds. Add one with: feedpipe add <url>");
        return;
    }
    for feed in feeds {
        println!("{}  {}", feed.title, feed.url);
    }
}

fn print_items(items: &[FeedItem]) {
    for item in items {
        let read = if item.is_read { ' ' } else { '*' };
        let saved = if item.is_saved { 's' } else { ' ' };
        println!("{read}{saved} {}  {}  [{}]", item.pub_date, item.title, item.guid);
    }
}
