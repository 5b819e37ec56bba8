// SPDX-License-Identifier: Apache-2.0

//! Native file system watcher using the `notify` crate.
//!
//! Uses OS-level file system notifications:
//! - Linux: inotify
//! - macOS: FSEvents
//! - Windows: ReadDirectoryChangesW
//!
//! One OS watcher serves every subscription. Each tailed path is registered
//! on it once, no matter how many subscribers it has, and events are routed
//! back to subscribers by the path they were registered under. The watch is
//! on the file itself, so events keep following it after it is renamed away
//! from the tailed path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use super::traits::{FileWatcher, Subscription, WatchEvent, WatcherError};
use crate::channel::{self, ChannelSender, SendError};

/// Events queued per subscription before further events are dropped.
const EVENT_QUEUE_SIZE: usize = 64;

/// Subscribers of each registered path, keyed by subscription id.
type Subscribers = HashMap<PathBuf, Vec<(u64, ChannelSender<WatchEvent>)>>;

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, WatcherError> {
    m.lock()
        .map_err(|e| WatcherError::Channel(format!("mutex poisoned: {}", e)))
}

/// Native file system watcher using OS-level notifications.
pub struct NativeWatcher {
    // Also serializes registration, so the subscriber count of a path and its
    // OS watch always change together.
    watcher: Arc<Mutex<RecommendedWatcher>>,
    subscribers: Arc<Mutex<Subscribers>>,
    next_id: AtomicU64,
}

impl NativeWatcher {
    /// Create a native watcher, failing if the platform backend can't start.
    pub fn new() -> Result<Self, WatcherError> {
        let subscribers: Arc<Mutex<Subscribers>> = Arc::default();

        let routes = subscribers.clone();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => Self::route(&routes, &event),
                Err(e) => warn!("File watcher error: {}", e),
            },
            Config::default(),
        )
        .map_err(|e| WatcherError::Init(e.to_string()))?;

        Ok(Self {
            watcher: Arc::new(Mutex::new(watcher)),
            subscribers,
            next_id: AtomicU64::new(0),
        })
    }

    /// Number of paths currently registered with the OS watcher.
    pub fn watched_paths(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Convert a notify event to a watch event for a single-file watch
    fn convert_event(event: &Event) -> Option<WatchEvent> {
        match event.kind {
            EventKind::Modify(ModifyKind::Name(_)) => Some(WatchEvent::Moved),
            EventKind::Modify(_) => Some(WatchEvent::Modified),
            EventKind::Create(_) => Some(WatchEvent::Modified),
            EventKind::Remove(_) => Some(WatchEvent::Deleted),
            EventKind::Access(_) => None, // Ignore access events
            EventKind::Any | EventKind::Other => Some(WatchEvent::Modified),
        }
    }

    /// Runs on the backend's event thread. Never blocks: the tailer re-probes
    /// its path at every EOF, so a dropped event is recovered there.
    fn route(subscribers: &Mutex<Subscribers>, event: &Event) {
        let Some(kind) = Self::convert_event(event) else {
            return;
        };

        let targets: Vec<ChannelSender<WatchEvent>> = match subscribers.lock() {
            Ok(subs) => event
                .paths
                .iter()
                .filter_map(|p| subs.get(p))
                .flat_map(|list| list.iter().map(|(_, tx)| tx.clone()))
                .collect(),
            Err(_) => return,
        };

        for tx in &targets {
            Self::forward(tx, kind);
            // The OS drops a watch whose file is gone.
            if kind == WatchEvent::Deleted {
                Self::forward(tx, WatchEvent::Unsubscribed);
            }
        }
    }

    fn forward(tx: &ChannelSender<WatchEvent>, event: WatchEvent) {
        match tx.try_send(event) {
            Ok(()) | Err(SendError::Disconnected) => {}
            Err(SendError::Full) => debug!("Watch queue full, dropping {:?}", event),
        }
    }
}

impl std::fmt::Debug for NativeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeWatcher")
            .field("watched_paths", &self.watched_paths())
            .finish()
    }
}

/// Deregisters one subscriber when its subscription is dropped, removing the
/// OS watch with the last one.
struct Registration {
    id: u64,
    path: PathBuf,
    watcher: Arc<Mutex<RecommendedWatcher>>,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let Ok(mut watcher) = self.watcher.lock() else {
            return;
        };

        let last = match self.subscribers.lock() {
            Ok(mut subs) => {
                let last = match subs.get_mut(&self.path) {
                    Some(list) => {
                        list.retain(|(id, _)| *id != self.id);
                        list.is_empty()
                    }
                    None => false,
                };
                if last {
                    subs.remove(&self.path);
                }
                last
            }
            Err(_) => false,
        };

        // Subscribers lock is released before talking to the backend, whose
        // event thread may be waiting on it.
        if last {
            if let Err(e) = watcher.unwatch(&self.path) {
                // Expected when the OS already dropped the watch with the file.
                debug!(path = ?self.path, "Unwatch failed: {}", e);
            }
        }
    }
}

impl FileWatcher for NativeWatcher {
    fn watch(&self, path: &Path) -> Result<Subscription, WatcherError> {
        let path = path.to_path_buf();
        let mut watcher = lock(&self.watcher)?;

        let registered = lock(&self.subscribers)?.contains_key(&path);
        if !registered {
            watcher
                .watch(&path, RecursiveMode::NonRecursive)
                .map_err(|e| WatcherError::Watch(format!("{}: {}", path.display(), e)))?;
        }

        let (tx, rx) = channel::bounded(EVENT_QUEUE_SIZE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers)?
            .entry(path.clone())
            .or_default()
            .push((id, tx));
        drop(watcher);

        debug!(path = ?path, backend = self.backend_name(), "Watching file");
        let registration = Registration {
            id,
            path: path.clone(),
            watcher: self.watcher.clone(),
            subscribers: self.subscribers.clone(),
        };
        Ok(Subscription::new(path, rx, Box::new(registration)))
    }

    fn is_native(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        #[cfg(target_os = "linux")]
        {
            "inotify"
        }
        #[cfg(target_os = "macos")]
        {
            "FSEvents"
        }
        #[cfg(target_os = "windows")]
        {
            "ReadDirectoryChangesW"
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            "native"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind, RenameMode};
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn next_matching(sub: &mut Subscription, want: WatchEvent) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            match tokio::time::timeout_at(deadline, sub.next()).await {
                Ok(event) if event == want => return true,
                Ok(_) => continue,
                Err(_) => return false,
            }
        }
    }

    fn append(path: &Path, data: &[u8]) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(data).unwrap();
        f.flush().unwrap();
    }

    #[test]
    fn test_convert_event_kinds() {
        let ev = |kind| Event::new(kind);
        assert_eq!(
            NativeWatcher::convert_event(&ev(EventKind::Modify(ModifyKind::Name(
                RenameMode::From
            )))),
            Some(WatchEvent::Moved)
        );
        assert_eq!(
            NativeWatcher::convert_event(&ev(EventKind::Modify(ModifyKind::Data(
                DataChange::Any
            )))),
            Some(WatchEvent::Modified)
        );
        assert_eq!(
            NativeWatcher::convert_event(&ev(EventKind::Create(CreateKind::File))),
            Some(WatchEvent::Modified)
        );
        assert_eq!(
            NativeWatcher::convert_event(&ev(EventKind::Remove(RemoveKind::File))),
            Some(WatchEvent::Deleted)
        );
        assert_eq!(
            NativeWatcher::convert_event(&ev(EventKind::Access(
                notify::event::AccessKind::Any
            ))),
            None
        );
    }

    #[test]
    fn test_route_by_path() {
        let subscribers: Mutex<Subscribers> = Mutex::default();
        let (tx_a, rx_a) = channel::bounded(4);
        let (tx_b, rx_b) = channel::bounded(4);
        {
            let mut subs = subscribers.lock().unwrap();
            subs.insert(PathBuf::from("/logs/a.log"), vec![(0, tx_a)]);
            subs.insert(PathBuf::from("/logs/b.log"), vec![(1, tx_b)]);
        }

        let event = Event::new(EventKind::Remove(RemoveKind::File))
            .add_path(PathBuf::from("/logs/a.log"));
        NativeWatcher::route(&subscribers, &event);

        assert_eq!(rx_a.try_recv(), Some(WatchEvent::Deleted));
        assert_eq!(rx_a.try_recv(), Some(WatchEvent::Unsubscribed));
        assert_eq!(rx_b.try_recv(), None);
    }

    #[test]
    fn test_native_watcher_create() {
        let watcher = NativeWatcher::new();
        assert!(watcher.is_ok());
    }

    #[test]
    fn test_native_watcher_is_native() {
        let watcher = NativeWatcher::new().unwrap();
        assert!(watcher.is_native());

        #[cfg(target_os = "linux")]
        assert_eq!(watcher.backend_name(), "inotify");
    }

    #[test]
    fn test_native_watch_missing_path_fails() {
        let dir = TempDir::new().unwrap();
        let watcher = NativeWatcher::new().unwrap();
        let result = watcher.watch(&dir.path().join("missing.log"));
        assert!(matches!(result, Err(WatcherError::Watch(_))));
        assert_eq!(watcher.watched_paths(), 0);
    }

    #[tokio::test]
    async fn test_native_watcher_detects_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "initial\n").unwrap();

        let watcher = NativeWatcher::new().unwrap();
        let mut sub = watcher.watch(&path).unwrap();

        append(&path, b"more\n");

        assert!(next_matching(&mut sub, WatchEvent::Modified).await);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_native_watcher_detects_rename() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "initial\n").unwrap();

        let watcher = NativeWatcher::new().unwrap();
        let mut sub = watcher.watch(&path).unwrap();

        fs::rename(&path, dir.path().join("app.log.1")).unwrap();

        assert!(next_matching(&mut sub, WatchEvent::Moved).await);
    }

    #[tokio::test]
    async fn test_shared_path_survives_first_unsubscribe() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "").unwrap();

        let watcher = NativeWatcher::new().unwrap();
        let first = watcher.watch(&path).unwrap();
        let mut second = watcher.watch(&path).unwrap();
        assert_eq!(watcher.watched_paths(), 1);

        first.cancel();
        assert_eq!(watcher.watched_paths(), 1);

        append(&path, b"still watched\n");
        assert!(next_matching(&mut second, WatchEvent::Modified).await);

        second.cancel();
        assert_eq!(watcher.watched_paths(), 0);
    }

    /// Every subscription shares one OS watcher, so the number of files is
    /// bounded by the watch limit, not by the per-user instance limit.
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_more_files_than_inotify_instances() {
        let instances: usize = fs::read_to_string("/proc/sys/fs/inotify/max_user_instances")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(128);
        let count = (instances + 16).min(2048);

        let dir = TempDir::new().unwrap();
        let watcher = NativeWatcher::new().unwrap();
        let mut subs = Vec::with_capacity(count);
        for i in 0..count {
            let path = dir.path().join(format!("f{:04}.log", i));
            fs::write(&path, "").unwrap();
            subs.push(watcher.watch(&path).unwrap());
        }
        assert_eq!(watcher.watched_paths(), count);

        append(&dir.path().join(format!("f{:04}.log", count - 1)), b"last\n");
        let last = subs.last_mut().unwrap();
        assert!(next_matching(last, WatchEvent::Modified).await);

        drop(subs);
        assert_eq!(watcher.watched_paths(), 0);
    }
}
