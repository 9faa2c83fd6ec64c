//! Configuration file parser for ~/.config/feedpipe/config.toml.
//!
//! The config file is optional. A missing or blank file yields
//! `Config::default()`; unknown keys are accepted and logged as warnings.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::{RefreshPolicy, DEFAULT_USER_AGENT};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds the maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    /// A key parsed but its value is unusable.
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration. Any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file. `None` means `feeds.db` in the config directory.
    pub database_path: Option<PathBuf>,

    /// Connect and overall timeout for each feed fetch. Must be at least 1.
    pub fetch_timeout_secs: u64,

    pub user_agent: String,

    /// Feeds fetched at once by `refresh`.
    pub refresh_concurrency: usize,

    /// How a re-ingest reconciles with stored items.
    pub refresh_policy: RefreshPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            fetch_timeout_secs: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            refresh_concurrency: 4,
            refresh_policy: RefreshPolicy::default(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 5] = [
        "database_path",
        "fetch_timeout_secs",
        "user_agent",
        "refresh_concurrency",
        "refresh_policy",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML or wrong value type → `Err(ConfigError::Parse)`
    /// - Zero `fetch_timeout_secs` → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        if config.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "fetch_timeout_secs must be at least 1".to_string(),
            ));
        }
        tracing::info!(
            path = %path.display(),
            policy = ?config.refresh_policy,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Configured database path, or `feeds.db` under `config_dir`.
    pub fn database_path_in(&self, config_dir: &Path) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir.join("feeds.db"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("feedpipe_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.database_path.is_none());
        assert_eq!(config.fetch_timeout_secs, 10);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(10));
        assert!(config.user_agent.starts_with("feedpipe/"));
        assert_eq!(config.refresh_concurrency, 4);
        assert_eq!(config.refresh_policy, RefreshPolicy::Upsert);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedpipe_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_empty_file_returns_default() {
        let (dir, path) = write_config("empty", "");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (dir, path) = write_config("whitespace", "   \n  \n  ");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "refresh_concurrency = 8\n");

        let config = Config::load(&path).unwrap();
        assert_eq!(config.refresh_concurrency, 8);
        assert_eq!(config.fetch_timeout_secs, 10); // default
        assert_eq!(config.refresh_policy, RefreshPolicy::Upsert); // default

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
database_path = "/var/lib/feedpipe/feeds.db"
fetch_timeout_secs = 30
user_agent = "my-reader/1.0"
refresh_concurrency = 2
refresh_policy = "preserve_flags"
"#;
        let (dir, path) = write_config("full", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.database_path.as_deref(),
            Some(Path::new("/var/lib/feedpipe/feeds.db"))
        );
        assert_eq!(config.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(config.user_agent, "my-reader/1.0");
        assert_eq!(config.refresh_concurrency, 2);
        assert_eq!(config.refresh_policy, RefreshPolicy::PreserveFlags);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_replace_items_policy() {
        let (dir, path) = write_config("replace", "refresh_policy = \"replace_items\"\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.refresh_policy, RefreshPolicy::ReplaceItems);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_policy_returns_error() {
        let (dir, path) = write_config("bad_policy", "refresh_policy = \"merge\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = r#"
refresh_concurrency = 3
totally_fake_key = "should not fail"
another_unknown = 42
"#;
        let (dir, path) = write_config("unknown", content);

        let config = Config::load(&path).unwrap();
        assert_eq!(config.refresh_concurrency, 3);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        // fetch_timeout_secs should be an integer, not a string
        let (dir, path) = write_config("wrongtype", "fetch_timeout_secs = \"ten\"\n");
        assert!(Config::load(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_zero_fetch_timeout_rejected() {
        let (dir, path) = write_config("zero_timeout", "fetch_timeout_secs = 0\n");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("fetch_timeout_secs"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_file_at_size_limit_accepted() {
        let mut content = "refresh_concurrency = 1\n".to_string();
        while content.len() < 1_048_576 - 20 {
            content.push_str("# padding comment\n");
        }
        content.truncate(1_048_576);
        let (dir, path) = write_config("at_limit", &content);

        assert!(Config::load(&path).is_ok());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_database_path_defaults_to_config_dir() {
        let dir = Path::new("/home/user/.config/feedpipe");
        assert_eq!(
            Config::default().database_path_in(dir),
            dir.join("feeds.db")
        );

        let config = Config {
            database_path: Some(PathBuf::from("/tmp/other.db")),
            ..Config::default()
        };
        assert_eq!(config.database_path_in(dir), PathBuf::from("/tmp/other.db"));
    }
}
