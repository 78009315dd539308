// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration file support for symdex
//!
//! Loads configuration from .symdexrc.toml in current directory or
//! `<config dir>/symdex/config.toml`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::indexer::pipeline::{default_workers, IndexOptions, DEFAULT_MAX_FILE_SIZE};
use crate::indexer::session::DEFAULT_DELTA_BUDGET;
use crate::parser::DEFAULT_EXTRACT_TIMEOUT;

pub const LOCAL_CONFIG_FILE: &str = ".symdexrc.toml";

/// Results per page when neither flag nor config sets one.
pub const DEFAULT_MAX_RESULTS: usize = 20;

/// Configuration loaded from .symdexrc.toml or the user config directory
#[derive(Debug, Default, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Index directory used when `--db` and INDEX_DB_PATH are unset
    pub db_path: Option<PathBuf>,
    pub workers: Option<usize>,
    /// Globs a file must match to be indexed
    pub include: Vec<String>,
    /// Globs for files and directories to skip
    pub exclude: Vec<String>,
    /// Files larger than this many bytes are skipped
    pub max_file_size: Option<u64>,
    /// In-memory delta size before spilling to the staging journal
    pub delta_budget_bytes: Option<usize>,
    pub extract_timeout_secs: Option<u64>,
    /// Default result window for `search`
    pub max_results: Option<usize>,
    /// Keep prior symbols of files whose extraction fails
    pub keep_failed: Option<bool>,
}

impl Config {
    /// Load configuration from files
    ///
    /// Precedence (highest to lowest):
    /// 1. .symdexrc.toml in current directory
    /// 2. <config dir>/symdex/config.toml
    pub fn load() -> Self {
        if let Some(config) = Self::load_from_path(Path::new(LOCAL_CONFIG_FILE)) {
            return config;
        }

        if let Some(dir) = dirs::config_dir() {
            let config_path = dir.join("symdex").join("config.toml");
            if let Some(config) = Self::load_from_path(&config_path) {
                return config;
            }
        }

        Self::default()
    }

    /// Parse one config file; unreadable or malformed files yield `None`.
    pub fn load_from_path(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(config) => {
                tracing::debug!("loaded config from {}", path.display());
                Some(config)
            }
            Err(e) => {
                tracing::warn!("failed to parse {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge CLI options with config (CLI wins)
    pub fn merge_max_results(&self, cli_value: Option<usize>) -> usize {
        cli_value
            .or(self.max_results)
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .max(1)
    }

    pub fn merge_workers(&self, cli_value: Option<usize>) -> usize {
        cli_value
            .or(self.workers)
            .unwrap_or_else(default_workers)
            .max(1)
    }

    /// Index directory from flag/env, then config.
    pub fn merge_db(&self, cli_value: Option<PathBuf>) -> Option<PathBuf> {
        cli_value.or_else(|| self.db_path.clone())
    }

    /// Fill build options: CLI globs extend config globs, scalar flags win.
    pub fn index_options(&self, root: PathBuf) -> IndexOptions {
        let mut options = IndexOptions::new(root);
        options.include = self.include.clone();
        options.exclude = self.exclude.clone();
        options.workers = self.merge_workers(None);
        options.max_file_size = self.max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE);
        options.delta_budget_bytes = self.delta_budget_bytes.unwrap_or(DEFAULT_DELTA_BUDGET);
        options.extract_timeout = self
            .extract_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_EXTRACT_TIMEOUT);
        options.keep_failed = self.keep_failed.unwrap_or(false);
        options.db = self.db_path.clone();
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_all_fields() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(LOCAL_CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
db_path = "/tmp/idx"
workers = 3
include = ["**/*.go"]
exclude = ["vendor"]
max_file_size = 2048
delta_budget_bytes = 4096
extract_timeout_secs = 5
max_results = 7
keep_failed = true
"#,
        )
        .expect("write config");

        let config = Config::load_from_path(&path).expect("config");
        assert_eq!(config.workers, Some(3));
        assert_eq!(config.merge_max_results(None), 7);
        assert_eq!(config.merge_max_results(Some(2)), 2);

        let options = config.index_options(PathBuf::from("/repo"));
        assert_eq!(options.db, Some(PathBuf::from("/tmp/idx")));
        assert_eq!(options.workers, 3);
        assert_eq!(options.max_file_size, 2048);
        assert_eq!(options.extract_timeout, Duration::from_secs(5));
        assert!(options.keep_failed);
    }

    #[test]
    fn malformed_file_is_ignored() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(LOCAL_CONFIG_FILE);
        std::fs::write(&path, "workers = \"many\"").expect("write config");
        assert!(Config::load_from_path(&path).is_none());
    }

    #[test]
    fn defaults_apply_without_file() {
        let config = Config::default();
        assert_eq!(config.merge_max_results(None), DEFAULT_MAX_RESULTS);
        assert!(config.merge_workers(None) >= 1);
        assert_eq!(config.merge_db(Some(PathBuf::from("x"))), Some(PathBuf::from("x")));
        assert_eq!(config.merge_db(None), None);
    }
}
