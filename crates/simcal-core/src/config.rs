use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Default cache lifetime for computed feeds (12 hours).
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 43_200;

/// Namespace prepended to every feed cache key.
pub const DEFAULT_CACHE_KEY_PREFIX: &str = "_simple-calendar_feed_id_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A problem with one configuration field.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: Severity,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Issues found by [`Config::validate`].
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    issues: Vec<ConfigIssue>,
}

impl ValidationReport {
    fn push(&mut self, severity: Severity, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ConfigIssue {
            severity,
            field: field.into(),
            message: message.into(),
        });
    }

    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Error, field, message);
    }

    fn warn(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, field, message);
    }

    pub fn issues(&self) -> &[ConfigIssue] {
        &self.issues
    }

    pub fn errors(&self) -> impl Iterator<Item = &ConfigIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ConfigIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    /// Warnings alone do not make a config invalid.
    pub fn is_valid(&self) -> bool {
        self.errors().next().is_none()
    }

    /// Whether `field` has an issue of the given severity.
    pub fn flags(&self, severity: Severity, field: &str) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity == severity && i.field == field)
    }

    /// The warnings, or every error folded into [`ConfigError::Invalid`].
    pub fn into_result(self) -> Result<Vec<ConfigIssue>, ConfigError> {
        let (errors, warnings): (Vec<_>, Vec<_>) = self
            .issues
            .into_iter()
            .partition(|i| i.severity == Severity::Error);

        if errors.is_empty() {
            return Ok(warnings);
        }
        let summary = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(ConfigError::Invalid(summary))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory `save()` writes config.toml to; relative cache paths resolve here
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Feed cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Grouped feeds known to this host
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

/// Where computed feeds are cached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,

    /// SQLite database file, required when `backend = "sqlite"`
    #[serde(default)]
    pub sqlite_path: Option<PathBuf>,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// TTL used by feeds that do not set their own. 0 disables expiry.
    #[serde(default = "default_ttl_seconds")]
    pub default_ttl_seconds: u64,
}

fn default_key_prefix() -> String {
    DEFAULT_CACHE_KEY_PREFIX.to_string()
}

fn default_ttl_seconds() -> u64 {
    DEFAULT_CACHE_TTL_SECONDS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            sqlite_path: None,
            key_prefix: default_key_prefix(),
            default_ttl_seconds: default_ttl_seconds(),
        }
    }
}

/// How a grouped feed picks its member calendars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedSource {
    #[default]
    Ids,
    Category,
}

impl FeedSource {
    /// The persisted value the calendar store keeps for this source.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedSource::Ids => "ids",
            FeedSource::Category => "category",
        }
    }
}

/// One grouped feed as written in config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub calendar_id: u64,

    #[serde(default)]
    pub source: FeedSource,

    /// Member calendars when `source = "ids"`
    #[serde(default)]
    pub ids: Vec<u64>,

    /// Category term ids when `source = "category"`
    #[serde(default)]
    pub categories: Vec<u64>,

    /// Earliest event start, Unix seconds, exclusive. 0 = unbounded.
    #[serde(default)]
    pub time_min: i64,

    /// Latest event start, Unix seconds, exclusive. 0 = unbounded.
    #[serde(default)]
    pub time_max: i64,

    #[serde(default)]
    pub cache_ttl_seconds: Option<u64>,
}

impl FeedConfig {
    /// TTL for this feed, falling back to the cache-wide default.
    pub fn effective_ttl(&self, cache: &CacheConfig) -> u64 {
        self.cache_ttl_seconds.unwrap_or(cache.default_ttl_seconds)
    }
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("simcal")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            cache: CacheConfig::default(),
            feeds: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, writing defaults there if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, Vec<ConfigIssue>)> {
        let config = Self::load()?;
        let warnings = config
            .validate()
            .into_result()
            .context("Configuration validation failed")?;

        for warning in &warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, warnings))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationReport {
        let mut result = ValidationReport::default();

        if self.cache.backend == CacheBackend::Sqlite && self.cache.sqlite_path.is_none() {
            result.error(
                "cache.sqlite_path",
                "SQLite cache backend requires a database path",
            );
        }

        if self.cache.default_ttl_seconds == 0 {
            result.warn(
                "cache.default_ttl_seconds",
                "Cached feeds never expire (0 seconds)",
            );
        }

        let mut seen = std::collections::HashSet::new();
        for (i, feed) in self.feeds.iter().enumerate() {
            let field = format!("feeds[{}]", i);

            if feed.calendar_id == 0 {
                result.error(
                    format!("{}.calendar_id", field),
                    "Calendar id must be greater than 0",
                );
            } else if !seen.insert(feed.calendar_id) {
                result.error(
                    format!("{}.calendar_id", field),
                    format!("Duplicate feed for calendar {}", feed.calendar_id),
                );
            }

            if feed.time_min > 0 && feed.time_max > 0 && feed.time_min >= feed.time_max {
                result.error(
                    format!("{}.time_max", field),
                    "time_max must be later than time_min",
                );
            }

            match feed.source {
                FeedSource::Ids if feed.ids.is_empty() => {
                    result.warn(format!("{}.ids", field), "No member calendars listed");
                }
                FeedSource::Category if feed.categories.is_empty() => {
                    result.warn(
                        format!("{}.categories", field),
                        "No categories listed; members will not be resolved",
                    );
                }
                _ => {}
            }

            if feed.ids.contains(&feed.calendar_id) {
                result.warn(
                    format!("{}.ids", field),
                    "Feed lists itself as a member calendar",
                );
            }
        }

        result
    }

    /// Save configuration as config.toml inside `config_dir`
    pub fn save(&self) -> Result<()> {
        self.save_to(&self.config_dir.join("config.toml"))
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// SQLite cache file, resolved against `config_dir` when relative
    pub fn sqlite_path(&self) -> Option<PathBuf> {
        self.cache.sqlite_path.as_ref().map(|path| {
            if path.is_absolute() {
                path.clone()
            } else {
                self.config_dir.join(path)
            }
        })
    }

    /// Look up the feed configured for a calendar
    pub fn feed(&self, calendar_id: u64) -> Option<&FeedConfig> {
        self.feeds.iter().find(|f| f.calendar_id == calendar_id)
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("simcal");

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    fn feed(calendar_id: u64) -> FeedConfig {
        FeedConfig {
            calendar_id,
            source: FeedSource::Ids,
            ids: vec![11, 12],
            categories: vec![],
            time_min: 0,
            time_max: 0,
            cache_ttl_seconds: None,
        }
    }

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.issues());
    }

    #[test]
    fn test_zero_calendar_id_is_error() {
        let mut config = Config::default();
        config.feeds.push(feed(0));
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.flags(Severity::Error, "feeds[0].calendar_id"));
    }

    #[test]
    fn test_duplicate_feed_is_error() {
        let mut config = Config::default();
        config.feeds.push(feed(5));
        config.feeds.push(feed(5));
        let result = config.validate();
        assert!(result.flags(Severity::Error, "feeds[1].calendar_id"));
    }

    #[test]
    fn test_inverted_window_is_error() {
        let mut config = Config::default();
        let mut f = feed(3);
        f.time_min = 200;
        f.time_max = 100;
        config.feeds.push(f);
        let result = config.validate();
        assert!(result.flags(Severity::Error, "feeds[0].time_max"));
    }

    #[test]
    fn test_sqlite_backend_requires_path() {
        let mut config = Config::default();
        config.cache.backend = CacheBackend::Sqlite;
        let result = config.validate();
        assert!(result.flags(Severity::Error, "cache.sqlite_path"));
    }

    #[test]
    fn test_empty_category_list_is_warning() {
        let mut config = Config::default();
        let mut f = feed(4);
        f.source = FeedSource::Category;
        config.feeds.push(f);
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.flags(Severity::Warning, "feeds[0].categories"));
    }

    #[test]
    fn test_effective_ttl_falls_back_to_cache_default() {
        let cache = CacheConfig::default();
        let mut f = feed(1);
        assert_eq!(f.effective_ttl(&cache), DEFAULT_CACHE_TTL_SECONDS);
        f.cache_ttl_seconds = Some(60);
        assert_eq!(f.effective_ttl(&cache), 60);
    }

    #[test]
    fn test_parse_feed_section() {
        let toml_str = r#"
            [cache]
            backend = "sqlite"
            sqlite_path = "/tmp/simcal/cache.db"

            [[feeds]]
            calendar_id = 9
            source = "category"
            categories = [3, 4]
            time_min = 100
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.cache.backend, CacheBackend::Sqlite);
        assert_eq!(config.cache.key_prefix, DEFAULT_CACHE_KEY_PREFIX);
        let f = config.feed(9).unwrap();
        assert_eq!(f.source, FeedSource::Category);
        assert_eq!(f.categories, vec![3, 4]);
        assert_eq!(f.time_max, 0);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.feeds.push(feed(21));
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.feeds.len(), 1);
        assert_eq!(loaded.feeds[0].ids, vec![11, 12]);
    }

    #[test]
    fn test_load_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(config.feeds.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_report_folds_errors_into_config_error() {
        let mut config = Config::default();
        config.feeds.push(feed(0));
        config.feeds.push(feed(0));

        let summary = match config.validate().into_result() {
            Err(ConfigError::Invalid(summary)) => summary,
            other => panic!("expected Invalid, got {other:?}"),
        };
        assert!(summary.contains("feeds[0].calendar_id"));
        assert!(summary.contains("feeds[1].calendar_id"));
    }

    #[test]
    fn test_report_keeps_warnings_when_valid() {
        let mut config = Config::default();
        let mut f = feed(4);
        f.ids.clear();
        config.feeds.push(f);

        let warnings = config.validate().into_result().unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "feeds[0].ids");
        assert_eq!(warnings[0].severity, Severity::Warning);
    }

    #[test]
    fn test_config_dir_defaults_when_omitted() {
        let config: Config = toml::from_str("[cache]\nbackend = \"memory\"\n").unwrap();
        assert_eq!(config.config_dir, Config::default().config_dir);
    }

    #[test]
    fn test_sqlite_path_resolves_against_config_dir() {
        let mut config = Config::default();
        config.config_dir = PathBuf::from("/srv/simcal");
        assert_eq!(config.sqlite_path(), None);

        config.cache.sqlite_path = Some(PathBuf::from("cache/feeds.db"));
        assert_eq!(config.sqlite_path(), Some(PathBuf::from("/srv/simcal/cache/feeds.db")));

        config.cache.sqlite_path = Some(PathBuf::from("/var/lib/feeds.db"));
        assert_eq!(config.sqlite_path(), Some(PathBuf::from("/var/lib/feeds.db")));
    }

    #[test]
    fn test_save_writes_into_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.config_dir = dir.path().to_path_buf();
        config.feeds.push(feed(8));
        config.save().unwrap();

        let loaded = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(loaded.config_dir, dir.path());
        assert_eq!(loaded.feeds[0].calendar_id, 8);
    }
}
