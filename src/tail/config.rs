// SPDX-License-Identifier: Apache-2.0

//! Configuration for tailers and glob-driven tailing.

use std::time::Duration;

use serde::Deserialize;

use crate::tail::watcher::WatcherConfig;

/// Bytes requested per read.
pub const DEFAULT_CHUNK_SIZE: usize = 65536;

/// Where a tailer starts reading a file it has just opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Absolute byte offset; every byte from here on is delivered
    Offset(u64),
    /// Current end of file; only data appended later is delivered
    #[default]
    End,
}

impl StartPosition {
    pub const BEGINNING: StartPosition = StartPosition::Offset(0);
}

/// Where to start reading from when a file is first discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAt {
    /// Start reading from the beginning of the file
    Beginning,
    /// Start reading from the end of the file (only new content)
    #[default]
    End,
}

impl From<StartAt> for StartPosition {
    fn from(s: StartAt) -> Self {
        match s {
            StartAt::Beginning => StartPosition::BEGINNING,
            StartAt::End => StartPosition::End,
        }
    }
}

/// Tuning knobs for a single tailer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TailConfig {
    /// Maximum number of bytes handed to the consumer per read
    pub chunk_size: usize,

    /// How often a symlinked path is re-checked for a new link or target
    #[serde(rename = "symlink_check_interval_ms", with = "millis")]
    pub symlink_check_interval: Duration,

    /// How often a vanished path is checked for reappearance
    #[serde(rename = "missing_file_check_interval_ms", with = "millis")]
    pub missing_file_check_interval: Duration,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            symlink_check_interval: Duration::from_secs(1),
            missing_file_check_interval: Duration::from_secs(1),
        }
    }
}

impl TailConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be positive".to_string());
        }
        if self.symlink_check_interval.is_zero() {
            return Err("symlink_check_interval must be positive".to_string());
        }
        if self.missing_file_check_interval.is_zero() {
            return Err("missing_file_check_interval must be positive".to_string());
        }
        Ok(())
    }
}

/// Configuration for discovering and tailing every file matching a set of globs
#[derive(Debug, Clone, Deserialize)]
pub struct GlobTailConfig {
    /// Glob patterns for files to include
    pub include: Vec<String>,

    /// Glob patterns for files to exclude
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Regular expressions for files to exclude (searched anywhere in the path)
    #[serde(default)]
    pub exclude_regex: Vec<String>,

    /// How often each include pattern is re-expanded
    #[serde(
        rename = "scan_interval_ms",
        with = "millis",
        default = "default_scan_interval"
    )]
    pub scan_interval: Duration,

    /// Where to start reading newly discovered files
    #[serde(default)]
    pub start_at: StartAt,

    #[serde(default)]
    pub tail: TailConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,
}

fn default_scan_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for GlobTailConfig {
    fn default() -> Self {
        Self {
            include: vec![],
            exclude: vec![],
            exclude_regex: vec![],
            scan_interval: default_scan_interval(),
            start_at: StartAt::default(),
            tail: TailConfig::default(),
            watcher: WatcherConfig::default(),
        }
    }
}

impl GlobTailConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.include.is_empty() {
            return Err("include patterns cannot be empty".to_string());
        }
        if self.scan_interval.is_zero() {
            return Err("scan_interval must be positive".to_string());
        }
        self.tail.validate()
    }
}

/// Serde adapter for durations written as integer milliseconds.
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tail::watcher::WatchMode;

    #[test]
    fn test_config_defaults() {
        let config = TailConfig::default();
        assert_eq!(config.chunk_size, 65536);
        assert_eq!(config.symlink_check_interval, Duration::from_secs(1));
        assert_eq!(config.missing_file_check_interval, Duration::from_secs(1));

        let glob = GlobTailConfig::default();
        assert_eq!(glob.scan_interval, Duration::from_secs(60));
        assert_eq!(glob.start_at, StartAt::End);
        assert_eq!(StartPosition::default(), StartPosition::End);
    }

    #[test]
    fn test_config_validation() {
        let mut config = GlobTailConfig {
            include: vec!["/var/log/*.log".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.include = vec![];
        assert!(config.validate().is_err());

        config.include = vec!["/var/log/*.log".to_string()];
        config.tail.chunk_size = 0;
        assert!(config.validate().is_err());

        config.tail.chunk_size = 10;
        config.scan_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_deserialize() {
        let json = r#"{
            "include": ["/var/log/*.log"],
            "exclude_regex": ["\\.gz$"],
            "scan_interval_ms": 500,
            "start_at": "beginning",
            "tail": {"missing_file_check_interval_ms": 50},
            "watcher": {"mode": "native"}
        }"#;
        let config: GlobTailConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.include, vec!["/var/log/*.log"]);
        assert!(config.exclude.is_empty());
        assert_eq!(config.exclude_regex, vec!["\\.gz$"]);
        assert_eq!(config.scan_interval, Duration::from_millis(500));
        assert_eq!(config.start_at, StartAt::Beginning);
        assert_eq!(config.tail.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(
            config.tail.missing_file_check_interval,
            Duration::from_millis(50)
        );
        assert_eq!(config.watcher.mode, WatchMode::Native);
    }

    #[test]
    fn test_start_at_into_position() {
        assert_eq!(StartPosition::from(StartAt::Beginning), StartPosition::Offset(0));
        assert_eq!(StartPosition::from(StartAt::End), StartPosition::End);
    }
}
