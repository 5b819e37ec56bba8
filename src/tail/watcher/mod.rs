// SPDX-License-Identifier: Apache-2.0

//! Change notifications for individual tailed files.
//!
//! A tailer asks a [`FileWatcher`] for a [`Subscription`] on the one path it
//! follows and is woken whenever that file changes. An event only means
//! "look again": the tailer re-reads and re-probes the path itself, so a
//! backend may coalesce or drop events without losing data.
//!
//! [`NativeWatcher`] shares a single OS notification handle between all
//! subscriptions and routes events by path. [`PollWatcher`] runs one stat
//! loop per subscription, which also works where kernel notifications never
//! arrive, such as NFS mounts.

mod native;
mod poll;
mod traits;

pub use native::NativeWatcher;
pub use poll::PollWatcher;
pub use traits::{FileWatcher, SharedWatcher, Subscription, WatchEvent, WatcherError};

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

/// Which backend delivers file change subscriptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// Kernel notifications when the platform offers them, stat polling
    /// otherwise.
    #[default]
    Auto,
    /// Kernel notifications only. Creating the watcher fails without them.
    Native,
    /// Stat each subscribed file every `poll_interval`.
    Poll,
}

impl std::str::FromStr for WatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s.to_ascii_lowercase().as_str() {
            "auto" => WatchMode::Auto,
            "native" => WatchMode::Native,
            "poll" | "polling" => WatchMode::Poll,
            other => return Err(format!("unknown watch mode: {other} (auto|native|poll)")),
        };
        Ok(mode)
    }
}

/// Backend selection shared by every tailer of a process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub mode: WatchMode,
    /// Stat period of each subscription in poll mode.
    #[serde(rename = "poll_interval_ms", with = "crate::tail::config::millis")]
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::Auto,
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Build the watcher that all tailers of one process subscribe through.
pub fn create_watcher(config: &WatcherConfig) -> Result<SharedWatcher, WatcherError> {
    let polling = || -> Result<SharedWatcher, WatcherError> {
        Ok(Arc::new(PollWatcher::new(config.poll_interval)?))
    };

    match config.mode {
        WatchMode::Poll => polling(),
        WatchMode::Native => Ok(Arc::new(NativeWatcher::new()?)),
        WatchMode::Auto => match NativeWatcher::new() {
            Ok(watcher) => {
                info!(backend = watcher.backend_name(), "Subscribing to file changes");
                Ok(Arc::new(watcher))
            }
            Err(e) => {
                warn!(
                    interval = ?config.poll_interval,
                    "No kernel file notifications ({}), polling subscribed files", e
                );
                polling()
            }
        },
    }
}
