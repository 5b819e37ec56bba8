// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::tail::config::DEFAULT_CHUNK_SIZE;
use crate::tail::watcher::{WatchMode, WatcherConfig};
use crate::tail::{GlobTailConfig, StartAt, TailConfig};

/// Where to start reading files
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum StartAtArg {
    /// Start at the beginning of the file
    Beginning,
    /// Start at the end of the file (tail mode)
    #[default]
    End,
}

impl From<StartAtArg> for StartAt {
    fn from(s: StartAtArg) -> Self {
        match s {
            StartAtArg::Beginning => StartAt::Beginning,
            StartAtArg::End => StartAt::End,
        }
    }
}

/// Watch mode for file system monitoring
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum WatchModeArg {
    /// Automatically select the best watching strategy (native first, poll fallback)
    #[default]
    Auto,
    /// Force native file system watching (inotify/kqueue/FSEvents)
    Native,
    /// Force polling mode (use for NFS or when native watching is unreliable)
    Poll,
}

impl From<WatchModeArg> for WatchMode {
    fn from(w: WatchModeArg) -> Self {
        match w {
            WatchModeArg::Auto => WatchMode::Auto,
            WatchModeArg::Native => WatchMode::Native,
            WatchModeArg::Poll => WatchMode::Poll,
        }
    }
}

/// Settings shared by every command that tails files
#[derive(Debug, Args, Clone)]
pub struct TailTuningArgs {
    /// Maximum bytes read per chunk
    #[arg(long, env = "GLOBTAIL_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// How often symlinked paths are checked for a new target, in milliseconds
    #[arg(
        long,
        env = "GLOBTAIL_SYMLINK_CHECK_INTERVAL_MS",
        default_value = "1000"
    )]
    pub symlink_check_interval_ms: u64,

    /// How often a vanished file is checked for reappearance, in milliseconds
    #[arg(
        long,
        env = "GLOBTAIL_MISSING_FILE_CHECK_INTERVAL_MS",
        default_value = "1000"
    )]
    pub missing_file_check_interval_ms: u64,

    /// Watch mode: auto (default), native (inotify/kqueue/FSEvents), poll (for NFS)
    #[arg(
        value_enum,
        long,
        env = "GLOBTAIL_WATCH_MODE",
        default_value = "auto"
    )]
    pub watch_mode: WatchModeArg,

    /// Poll interval in milliseconds (only used in poll mode)
    #[arg(long, env = "GLOBTAIL_POLL_INTERVAL_MS", default_value = "250")]
    pub poll_interval_ms: u64,
}

impl TailTuningArgs {
    pub fn tail_config(&self) -> TailConfig {
        TailConfig {
            chunk_size: self.chunk_size,
            symlink_check_interval: Duration::from_millis(self.symlink_check_interval_ms),
            missing_file_check_interval: Duration::from_millis(self.missing_file_check_interval_ms),
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            mode: self.watch_mode.into(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct TailArgs {
    /// Files to follow
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Where to start reading: beginning or end of file
    #[arg(
        value_enum,
        long,
        env = "GLOBTAIL_START_AT",
        default_value = "end"
    )]
    pub start_at: StartAtArg,

    #[command(flatten)]
    pub tuning: TailTuningArgs,
}

#[derive(Debug, Args, Clone)]
pub struct GlobTailArgs {
    /// Glob patterns for files to follow (e.g., "/var/log/*.log")
    #[arg(required = true)]
    pub include: Vec<String>,

    /// Comma-separated glob patterns for files to exclude
    #[arg(long, env = "GLOBTAIL_EXCLUDE", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Regular expression for paths to exclude; repeat for more than one
    #[arg(long, env = "GLOBTAIL_EXCLUDE_REGEX")]
    pub exclude_regex: Vec<String>,

    /// How often the patterns are re-expanded, in milliseconds
    #[arg(long, env = "GLOBTAIL_SCAN_INTERVAL_MS", default_value = "60000")]
    pub scan_interval_ms: u64,

    /// Where to start reading newly discovered files
    #[arg(
        value_enum,
        long,
        env = "GLOBTAIL_START_AT",
        default_value = "end"
    )]
    pub start_at: StartAtArg,

    #[command(flatten)]
    pub tuning: TailTuningArgs,
}

impl GlobTailArgs {
    pub fn to_config(&self) -> GlobTailConfig {
        GlobTailConfig {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            exclude_regex: self.exclude_regex.clone(),
            scan_interval: Duration::from_millis(self.scan_interval_ms),
            start_at: self.start_at.into(),
            tail: self.tuning.tail_config(),
            watcher: self.tuning.watcher_config(),
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct WatchGlobArgs {
    /// Glob patterns to watch
    #[arg(required = true)]
    pub patterns: Vec<String>,

    /// How often the patterns are re-expanded, in milliseconds
    #[arg(long, env = "GLOBTAIL_SCAN_INTERVAL_MS", default_value = "60000")]
    pub scan_interval_ms: u64,
}

impl WatchGlobArgs {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}
