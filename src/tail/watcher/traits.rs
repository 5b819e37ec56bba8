// SPDX-License-Identifier: Apache-2.0

//! Traits and types for per-path change subscriptions.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::channel::ChannelReceiver;

/// Error type for watcher operations
#[derive(Debug)]
pub enum WatcherError {
    /// Failed to initialize the watcher
    Init(String),
    /// Failed to watch a path
    Watch(String),
    /// IO error
    Io(std::io::Error),
    /// Channel error
    Channel(String),
}

impl fmt::Display for WatcherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatcherError::Init(msg) => write!(f, "watcher initialization failed: {}", msg),
            WatcherError::Watch(msg) => write!(f, "watch failed: {}", msg),
            WatcherError::Io(e) => write!(f, "IO error: {}", e),
            WatcherError::Channel(msg) => write!(f, "channel error: {}", msg),
        }
    }
}

impl std::error::Error for WatcherError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WatcherError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for WatcherError {
    fn from(e: std::io::Error) -> Self {
        WatcherError::Io(e)
    }
}

/// Change notification for a single watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    /// Content or metadata changed
    Modified,
    /// The watched file was renamed
    Moved,
    /// The watched file was removed
    Deleted,
    /// The backend stopped delivering events for this subscription
    Unsubscribed,
}

/// A live watch on one path. Dropping it (or calling [`cancel`](Self::cancel))
/// stops the underlying OS watch or poll task.
pub struct Subscription {
    path: PathBuf,
    events: ChannelReceiver<WatchEvent>,
    unsubscribed: bool,
    // Mutex only makes the backend guard Sync.
    _guard: Mutex<Box<dyn Send>>,
}

impl Subscription {
    pub fn new(
        path: impl Into<PathBuf>,
        events: ChannelReceiver<WatchEvent>,
        guard: Box<dyn Send>,
    ) -> Self {
        Self {
            path: path.into(),
            events,
            unsubscribed: false,
            _guard: Mutex::new(guard),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next event for this path. A backend that goes away is reported once as
    /// [`WatchEvent::Unsubscribed`]; after that this never resolves.
    pub async fn next(&mut self) -> WatchEvent {
        if !self.unsubscribed {
            if let Some(event) = self.events.next().await {
                if event == WatchEvent::Unsubscribed {
                    self.unsubscribed = true;
                }
                return event;
            }
            self.unsubscribed = true;
            return WatchEvent::Unsubscribed;
        }
        std::future::pending().await
    }

    /// Drain whatever is already queued without waiting.
    pub fn try_next(&mut self) -> Option<WatchEvent> {
        if self.unsubscribed {
            return None;
        }
        self.events.try_recv()
    }

    pub fn cancel(self) {}
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("unsubscribed", &self.unsubscribed)
            .finish()
    }
}

/// Source of per-path change subscriptions.
///
/// Implementations can use native OS file system notifications or polling.
pub trait FileWatcher: Send + Sync {
    /// Start watching `path`. Events for the file it currently resolves to are
    /// delivered through the returned subscription.
    fn watch(&self, path: &Path) -> Result<Subscription, WatcherError>;

    /// Check if the watcher is using native OS notifications.
    ///
    /// Returns true for inotify/kqueue/FSEvents watchers, false for poll watchers.
    fn is_native(&self) -> bool;

    /// Get the name of the watcher backend for logging.
    fn backend_name(&self) -> &'static str;
}

pub type SharedWatcher = Arc<dyn FileWatcher>;
