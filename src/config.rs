//! Configuration loading from environment.
//!
//! Every setting has a default so the service starts with an empty
//! environment. Seed patterns can be supplied from a JSON file.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, WardenError};
use crate::models::Category;
use crate::overlap::{OverlapDetector, DEFAULT_SAMPLES_PER_PATTERN};
use crate::pager::DEFAULT_PAGE_SIZE;
use crate::pending::{PendingStore, DEFAULT_PENDING_TTL};
use crate::publish::{PublishSettings, UpdateMode};
use crate::registry::DEFAULT_MATCHER_SIZE_LIMIT;
use crate::sampler::{Sampler, DEFAULT_REPEAT_LIMIT};

/// Default seconds between a committed mutation and the peer update.
pub const DEFAULT_EXCHANGE_DELAY_SECS: u64 = 5;

/// Main configuration for the registry service.
#[derive(Debug, Clone)]
pub struct WardenConfig {
    /// SQLite database file.
    pub database_path: String,
    /// Staging directory for packaged snapshots.
    pub data_dir: PathBuf,
    /// Name this service uses on the exchange.
    pub sender_name: String,
    pub update_mode: UpdateMode,
    /// Peers that receive update notices.
    pub update_to: Vec<String>,
    /// Path announced to peers in reload mode.
    pub reload_path: String,
    pub exchange_delay: Duration,
    pub pending_ttl: Duration,
    pub page_size: usize,
    /// Compiled size cap for each category's combined matcher, in bytes.
    pub matcher_size_limit: usize,
    pub sample_repeat_limit: u32,
    pub samples_per_pattern: usize,
    pub enabled_categories: Vec<Category>,
    /// Initial patterns for categories with nothing stored yet.
    pub seed_patterns: HashMap<Category, Vec<String>>,
}

impl WardenConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional environment variables:
    /// - `DATABASE_PATH`: SQLite file (default: data/regex.db)
    /// - `DATA_DIR`: Artifact staging directory (default: data)
    /// - `SENDER_NAME`: Exchange sender name (default: REGEX)
    /// - `UPDATE_MODE`: `reload` or `download` (default: reload)
    /// - `UPDATE_TO`: Comma-separated peer names
    /// - `RELOAD_PATH`: Path announced in reload mode (default: data/compiled)
    /// - `EXCHANGE_DELAY_SECS`: Delay before publishing (default: 5)
    /// - `PENDING_TTL_SECS`: Confirmation lifetime (default: 900)
    /// - `PAGE_SIZE`: Patterns per listing page (default: 50)
    /// - `MATCHER_SIZE_LIMIT`: Combined matcher size cap in bytes (default: 512 MiB)
    /// - `SAMPLE_REPEAT_LIMIT`: Max repetitions when sampling (default: 32)
    /// - `SAMPLES_PER_PATTERN`: Samples per overlap comparison (default: 4)
    /// - `ENABLED_CATEGORIES`: Comma-separated categories (default: all)
    /// - `SEED_PATTERNS_PATH`: JSON file mapping category to patterns
    pub fn from_env() -> Result<Self> {
        let update_mode = match env::var("UPDATE_MODE") {
            Ok(mode) => UpdateMode::parse(&mode)?,
            Err(_) => UpdateMode::Reload,
        };

        let page_size = parse_number("PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        if page_size == 0 {
            return Err(WardenError::Config("PAGE_SIZE must be positive".to_string()));
        }

        let matcher_size_limit = parse_number("MATCHER_SIZE_LIMIT", DEFAULT_MATCHER_SIZE_LIMIT)?;
        if matcher_size_limit == 0 {
            return Err(WardenError::Config(
                "MATCHER_SIZE_LIMIT must be positive".to_string(),
            ));
        }

        let enabled_categories = parse_categories(&parse_list("ENABLED_CATEGORIES"))?;

        let seed_patterns = match env::var("SEED_PATTERNS_PATH") {
            Ok(path) => load_seed_patterns(&path)?,
            Err(_) => HashMap::new(),
        };

        Ok(Self {
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "data/regex.db".to_string()),
            data_dir: PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string())),
            sender_name: env::var("SENDER_NAME").unwrap_or_else(|_| "REGEX".to_string()),
            update_mode,
            update_to: parse_list("UPDATE_TO"),
            reload_path: env::var("RELOAD_PATH").unwrap_or_else(|_| "data/compiled".to_string()),
            exchange_delay: Duration::from_secs(parse_number(
                "EXCHANGE_DELAY_SECS",
                DEFAULT_EXCHANGE_DELAY_SECS,
            )?),
            pending_ttl: Duration::from_secs(parse_number(
                "PENDING_TTL_SECS",
                DEFAULT_PENDING_TTL.as_secs(),
            )?),
            page_size,
            matcher_size_limit,
            sample_repeat_limit: parse_number("SAMPLE_REPEAT_LIMIT", DEFAULT_REPEAT_LIMIT)?,
            samples_per_pattern: parse_number("SAMPLES_PER_PATTERN", DEFAULT_SAMPLES_PER_PATTERN)?,
            enabled_categories,
            seed_patterns,
        })
    }

    pub fn overlap_detector(&self) -> OverlapDetector {
        OverlapDetector::new(
            Sampler::new(self.sample_repeat_limit),
            self.samples_per_pattern,
        )
    }

    pub fn pending_store(&self) -> PendingStore {
        PendingStore::with_ttl(self.pending_ttl)
    }

    pub fn publish_settings(&self) -> PublishSettings {
        PublishSettings {
            sender: self.sender_name.clone(),
            recipients: self.update_to.clone(),
            mode: self.update_mode,
            reload_path: self.reload_path.clone(),
            staging_dir: self.data_dir.join("tmp"),
            delay: self.exchange_delay,
        }
    }
}

/// Resolve category names; an empty list enables every category.
fn parse_categories(names: &[String]) -> Result<Vec<Category>> {
    if names.is_empty() {
        return Ok(Category::all().to_vec());
    }

    let mut categories = names
        .iter()
        .map(|name| {
            Category::parse(name)
                .map_err(|_| WardenError::Config(format!("Unknown category in config: {}", name)))
        })
        .collect::<Result<Vec<_>>>()?;
    categories.sort();
    categories.dedup();
    Ok(categories)
}

/// Load seed patterns from a JSON file of the form `{"bad": ["foo"]}`.
fn load_seed_patterns(path: &str) -> Result<HashMap<Category, Vec<String>>> {
    let path = Path::new(path);
    let content = fs::read_to_string(path)
        .map_err(|e| WardenError::Config(format!("Failed to read seed patterns file: {}", e)))?;

    let raw: HashMap<String, Vec<String>> = serde_json::from_str(&content)
        .map_err(|e| WardenError::Config(format!("Failed to parse seed patterns file: {}", e)))?;

    raw.into_iter()
        .map(|(name, patterns)| {
            let category = Category::parse(&name).map_err(|_| {
                WardenError::Config(format!("Unknown category in seed patterns: {}", name))
            })?;
            Ok((category, patterns))
        })
        .collect()
}

/// Parse a comma-separated list from an environment variable.
fn parse_list(var_name: &str) -> Vec<String> {
    env::var(var_name)
        .ok()
        .map(|s| {
            s.split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Parse a numeric environment variable, falling back to `default` when unset.
fn parse_number<T: FromStr>(var_name: &str, default: T) -> Result<T> {
    match env::var(var_name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| WardenError::Config(format!("{} is not a valid number: {}", var_name, raw))),
        Err(_) => Ok(default),
    }
}
