// SPDX-License-Identifier: Apache-2.0

//! Polling-based file watcher as a fallback for systems where native
//! file system notifications are unavailable or unreliable (e.g., NFS).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::traits::{FileWatcher, Subscription, WatchEvent, WatcherError};
use crate::channel::{self, ChannelSender};
use crate::tail::identity::FileIdentity;

const EVENT_QUEUE_SIZE: usize = 16;

/// File metadata for change detection
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileState {
    identity: FileIdentity,
    /// Last modification time
    modified: Option<SystemTime>,
    /// File size in bytes
    size: u64,
}

impl FileState {
    fn probe(path: &Path) -> Option<Self> {
        let metadata = fs::metadata(path).ok()?;
        Some(Self {
            identity: FileIdentity::from_metadata(&metadata),
            modified: metadata.modified().ok(),
            size: metadata.len(),
        })
    }

    /// Event implied by going from `prev` to `next`, if any.
    fn transition(prev: &Option<Self>, next: &Option<Self>) -> Option<WatchEvent> {
        match (prev, next) {
            (Some(_), None) => Some(WatchEvent::Deleted),
            (None, Some(_)) => Some(WatchEvent::Modified),
            (Some(old), Some(new)) if old.identity != new.identity => Some(WatchEvent::Moved),
            (Some(old), Some(new)) if old != new => Some(WatchEvent::Modified),
            _ => None,
        }
    }
}

/// Polling-based file watcher.
///
/// Each subscription is a small task that stats its path every
/// `poll_interval`. Use this for NFS and other network file systems where
/// native watching is unreliable.
#[derive(Debug, Clone)]
pub struct PollWatcher {
    poll_interval: Duration,
}

impl PollWatcher {
    pub fn new(poll_interval: Duration) -> Result<Self, WatcherError> {
        if poll_interval.is_zero() {
            return Err(WatcherError::Init(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self { poll_interval })
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn poll_path(
        path: PathBuf,
        interval: Duration,
        tx: ChannelSender<WatchEvent>,
        cancel: CancellationToken,
    ) {
        let mut state = FileState::probe(&path);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let next = FileState::probe(&path);
            if let Some(event) = FileState::transition(&state, &next) {
                // Modified is level-triggered here, so a full queue can skip it.
                let sent = match event {
                    WatchEvent::Modified => tx.try_send(event).or_else(|e| match e {
                        channel::SendError::Full => Ok(()),
                        e => Err(e),
                    }),
                    _ => tx.send(event).await,
                };
                if sent.is_err() {
                    break;
                }
            }
            state = next;
        }
        debug!(path = ?path, "Poll subscription stopped");
    }
}

impl FileWatcher for PollWatcher {
    fn watch(&self, path: &Path) -> Result<Subscription, WatcherError> {
        // Same contract as a native watch: the path has to exist now.
        fs::metadata(path).map_err(|e| WatcherError::Watch(format!("{}: {}", path.display(), e)))?;

        let (tx, rx) = channel::bounded(EVENT_QUEUE_SIZE);
        let cancel = CancellationToken::new();
        tokio::spawn(Self::poll_path(
            path.to_path_buf(),
            self.poll_interval,
            tx,
            cancel.clone(),
        ));

        Ok(Subscription::new(path, rx, Box::new(cancel.drop_guard())))
    }

    fn is_native(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "poll"
    }
}
