// SPDX-License-Identifier: Apache-2.0

//! Periodic glob expansion with identity-based change tracking.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use glob::{Pattern, glob};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::channel::{self, ChannelReceiver, ChannelSender, SendError};
use crate::tail::error::{Error, Result};
use crate::tail::identity::FileIdentity;

/// Receives discovery notifications from a [`GlobScanner`]. Calls for one
/// scanner never overlap.
pub trait GlobHandler: Send + 'static {
    /// A file not seen by the previous scan now matches.
    fn file_found(&mut self, path: &Path);

    /// A previously found file no longer matches. `path` is the last path it
    /// was seen under.
    fn file_deleted(&mut self, _path: &Path) {}
}

/// Discovery notification forwarded by the channel handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobEvent {
    Found(PathBuf),
    Deleted(PathBuf),
}

impl GlobHandler for ChannelSender<GlobEvent> {
    fn file_found(&mut self, path: &Path) {
        forward(self, GlobEvent::Found(path.to_path_buf()));
    }

    fn file_deleted(&mut self, path: &Path) {
        forward(self, GlobEvent::Deleted(path.to_path_buf()));
    }
}

fn forward(tx: &ChannelSender<GlobEvent>, event: GlobEvent) {
    match tx.try_send(event) {
        Ok(()) | Err(SendError::Disconnected) => {}
        Err(SendError::Full) => warn!("Glob event queue is full, dropping event"),
    }
}

/// Watches one glob pattern for files appearing and disappearing.
///
/// The pattern is expanded once immediately and then every `interval`. Files
/// are tracked by [`FileIdentity`], so hardlinks are reported once and a file
/// keeps its entry while its identity keeps matching.
#[derive(Debug)]
pub struct GlobScanner {
    pattern: String,
    interval: Duration,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl GlobScanner {
    /// Start scanning on a new task. Must be called from within a tokio runtime.
    pub fn start<H: GlobHandler>(
        pattern: impl Into<String>,
        interval: Duration,
        handler: H,
    ) -> Result<Self> {
        Self::start_with_token(pattern, interval, handler, CancellationToken::new())
    }

    /// Start scanning, forwarding events into a new unbounded channel.
    pub fn with_channel(
        pattern: impl Into<String>,
        interval: Duration,
    ) -> Result<(Self, ChannelReceiver<GlobEvent>)> {
        let (tx, rx) = channel::unbounded();
        let scanner = Self::start(pattern, interval, tx)?;
        Ok((scanner, rx))
    }

    pub(crate) fn start_with_token<H: GlobHandler>(
        pattern: impl Into<String>,
        interval: Duration,
        handler: H,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let pattern = pattern.into();
        Pattern::new(&pattern).map_err(|e| Error::InvalidGlob(format!("{}: {}", pattern, e)))?;
        if interval.is_zero() {
            return Err(Error::Config("scan interval must be positive".to_string()));
        }

        debug!(pattern = %pattern, interval = ?interval, "Starting glob scanner");
        let task = tokio::spawn(Self::run(
            pattern.clone(),
            interval,
            handler,
            cancel.clone(),
        ));

        Ok(Self {
            pattern,
            interval,
            cancel,
            task,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop scanning. Files already reported are not affected.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(pattern = %self.pattern, "Glob scanner task failed: {}", e);
        }
    }

    async fn run<H: GlobHandler>(
        pattern: String,
        interval: Duration,
        mut handler: H,
        cancel: CancellationToken,
    ) {
        let mut tracked: HashMap<FileIdentity, PathBuf> = HashMap::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let expand_pattern = pattern.clone();
            let candidates = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                res = tokio::task::spawn_blocking(move || expand(&expand_pattern)) => match res {
                    Ok(candidates) => candidates,
                    Err(e) => {
                        warn!(pattern = %pattern, "Glob expansion failed: {}", e);
                        continue;
                    }
                },
            };

            if !apply_scan(&mut tracked, candidates, &mut handler, &cancel) {
                break;
            }
        }

        debug!(pattern = %pattern, "Glob scanner stopped");
    }
}

/// Expand `pattern` into the files it currently matches, one entry per
/// identity. Entries that vanish or can't be stat'ed are skipped.
pub(crate) fn expand(pattern: &str) -> Vec<(FileIdentity, PathBuf)> {
    let paths = match glob(pattern) {
        Ok(paths) => paths,
        Err(e) => {
            warn!(pattern = %pattern, "Invalid glob pattern: {}", e);
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    let mut found = Vec::new();
    for entry in paths {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                debug!(pattern = %pattern, "Skipping unreadable glob entry: {}", e);
                continue;
            }
        };
        match fs::metadata(&path) {
            Ok(metadata) => {
                let identity = FileIdentity::from_metadata(&metadata);
                if seen.insert(identity) {
                    found.push((identity, path));
                }
            }
            Err(e) => debug!(path = ?path, "Skipping entry that could not be stat'ed: {}", e),
        }
    }
    found
}

/// Diff one scan against the tracked set and notify the handler. Returns
/// false if the scanner was stopped while reporting.
fn apply_scan<H: GlobHandler>(
    tracked: &mut HashMap<FileIdentity, PathBuf>,
    candidates: Vec<(FileIdentity, PathBuf)>,
    handler: &mut H,
    cancel: &CancellationToken,
) -> bool {
    let current: HashSet<FileIdentity> = candidates.iter().map(|(id, _)| *id).collect();

    for (identity, path) in candidates {
        match tracked.get_mut(&identity) {
            Some(last) => *last = path,
            None => {
                if cancel.is_cancelled() {
                    return false;
                }
                debug!(path = ?path, identity = %identity, "Glob match found");
                tracked.insert(identity, path.clone());
                handler.file_found(&path);
            }
        }
    }

    let mut gone: Vec<(FileIdentity, PathBuf)> = Vec::new();
    tracked.retain(|identity, path| {
        if current.contains(identity) {
            true
        } else {
            gone.push((*identity, path.clone()));
            false
        }
    });
    gone.sort_by(|a, b| a.1.cmp(&b.1));

    for (identity, path) in gone {
        if cancel.is_cancelled() {
            return false;
        }
        debug!(path = ?path, identity = %identity, "Glob match removed");
        handler.file_deleted(&path);
    }
    true
}
