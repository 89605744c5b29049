//! Configuration types

use crate::error::{Error, Result};
use crate::types::ParseFlags;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// tucache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache configuration
    pub cache: CacheConfig,

    /// Parser configuration
    pub parser: ParserConfig,
}

impl Config {
    /// Load a configuration from a JSON file.
    ///
    /// Missing sections and fields fall back to their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the cache cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cache.queue_len == 0 {
            return Err(Error::Config("cache.queue_len must be at least 1".into()));
        }
        if self.cache.workers == 0 {
            return Err(Error::Config("cache.workers must be at least 1".into()));
        }
        if self.cache.refresh_interval_ms == Some(0) {
            return Err(Error::Config(
                "cache.refresh_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Capacity of the background work queue
    pub queue_len: usize,

    /// Number of background workers draining the queue
    pub workers: usize,

    /// Refresh every cached unit on this interval (milliseconds)
    pub refresh_interval_ms: Option<u64>,
}

impl CacheConfig {
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval_ms.map(Duration::from_millis)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            queue_len: 10,
            workers: 1,
            refresh_interval_ms: None,
        }
    }
}

/// Which parse engine builds translation units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// In-process tree-sitter parsing
    #[default]
    TreeSitter,
    /// The clang executable
    Clang,
}

impl std::str::FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tree-sitter" | "treesitter" => Ok(EngineKind::TreeSitter),
            "clang" => Ok(EngineKind::Clang),
            other => Err(Error::Config(format!("unknown engine: {}", other))),
        }
    }
}

/// Parser configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Engine used to build units
    pub engine: EngineKind,

    /// Path to the clang executable (auto-detected when unset)
    pub clang_path: Option<PathBuf>,

    /// Precompile unit preambles
    pub precompiled_preamble: bool,

    /// Cache completion results inside units
    pub cache_completion_results: bool,
}

impl ParserConfig {
    /// Flags passed to every parse and reparse
    pub fn parse_flags(&self) -> ParseFlags {
        let mut flags = ParseFlags::empty();
        if self.precompiled_preamble {
            flags |= ParseFlags::PRECOMPILED_PREAMBLE;
        }
        if self.cache_completion_results {
            flags |= ParseFlags::CACHE_COMPLETION_RESULTS;
        }
        flags
    }
}
