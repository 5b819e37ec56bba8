// SPDX-License-Identifier: Apache-2.0

//! Glob-driven tailing: every file discovered by the scanners gets its own
//! [`FileTailer`], unless an exclude rule matches it.
//!
//! All scanners report into one coordinator task, which owns the consumer
//! factory, the hooks and the set of spawned tailers. Tailers are never
//! touched after spawning, except to be closed on shutdown.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use glob::Pattern;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{self, ChannelReceiver};
use crate::tail::config::{GlobTailConfig, StartPosition, TailConfig};
use crate::tail::consumer::TailConsumer;
use crate::tail::error::{Error, Result};
use crate::tail::exclude::ExcludeRuleSet;
use crate::tail::scanner::{GlobEvent, GlobScanner};
use crate::tail::tailer::FileTailer;
use crate::tail::watcher::{SharedWatcher, create_watcher};

/// Overridable reactions to paths that are not tailed.
pub trait TailHooks: Send + 'static {
    /// A discovered path matched an exclude rule.
    fn file_excluded(&mut self, path: &Path) {
        info!(path = ?path, "Excluding file");
    }

    /// A discovered path could not be tailed. Scanning continues.
    fn file_error(&mut self, path: &Path, error: &Error) {
        warn!(path = ?path, "Unable to tail file: {}", error);
    }
}

/// Hooks that only log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHooks;

impl TailHooks for LogHooks {}

/// Discovers files matching a set of glob patterns and tails each one.
#[derive(Debug)]
pub struct GlobTail {
    scanners: Vec<GlobScanner>,
    scan_cancel: CancellationToken,
    tail_cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl GlobTail {
    /// Start scanning with the watcher backend selected by `config.watcher`.
    ///
    /// `factory` is called once per tailed file to build its consumer.
    pub fn start<F, C, H>(config: &GlobTailConfig, factory: F, hooks: H) -> Result<Self>
    where
        F: FnMut(&Path) -> C + Send + 'static,
        C: TailConsumer,
        H: TailHooks,
    {
        config.validate().map_err(Error::Config)?;
        let watcher = create_watcher(&config.watcher)?;
        Self::start_with_watcher(config, watcher, factory, hooks)
    }

    /// Same as [`start`](Self::start) with an explicit watcher backend.
    pub fn start_with_watcher<F, C, H>(
        config: &GlobTailConfig,
        watcher: SharedWatcher,
        factory: F,
        hooks: H,
    ) -> Result<Self>
    where
        F: FnMut(&Path) -> C + Send + 'static,
        C: TailConsumer,
        H: TailHooks,
    {
        config.validate().map_err(Error::Config)?;
        for pattern in &config.include {
            Pattern::new(pattern).map_err(|e| Error::InvalidGlob(format!("{}: {}", pattern, e)))?;
        }
        let excludes = ExcludeRuleSet::build(&config.exclude, &config.exclude_regex)?;

        let scan_cancel = CancellationToken::new();
        let tail_cancel = CancellationToken::new();
        let (tx, rx) = channel::unbounded();

        let coordinator = Coordinator {
            factory,
            hooks,
            excludes,
            start: config.start_at.into(),
            tail_config: config.tail.clone(),
            watcher,
            tailers: HashMap::new(),
            scan_cancel: scan_cancel.clone(),
            tail_cancel: tail_cancel.clone(),
        };
        let task = tokio::spawn(coordinator.run(rx));

        let mut scanners = Vec::with_capacity(config.include.len());
        for pattern in &config.include {
            match GlobScanner::start_with_token(
                pattern.clone(),
                config.scan_interval,
                tx.clone(),
                scan_cancel.child_token(),
            ) {
                Ok(scanner) => scanners.push(scanner),
                Err(e) => {
                    scan_cancel.cancel();
                    tail_cancel.cancel();
                    return Err(e);
                }
            }
        }

        info!(
            include = ?config.include,
            exclude_rules = config.exclude.len() + config.exclude_regex.len(),
            start_at = ?config.start_at,
            "Started glob tail"
        );

        Ok(Self {
            scanners,
            scan_cancel,
            tail_cancel,
            task,
        })
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.scanners.iter().map(|s| s.pattern())
    }

    /// Stop discovering files. Tailers already running keep running.
    pub fn stop(&self) {
        self.scan_cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.scan_cancel.is_cancelled()
    }

    /// Stop discovering files and close every tailer spawned so far.
    pub fn shutdown(&self) {
        self.scan_cancel.cancel();
        self.tail_cancel.cancel();
    }

    /// Wait for the scanners and the coordinator task to exit.
    pub async fn join(self) {
        for scanner in self.scanners {
            scanner.join().await;
        }
        if let Err(e) = self.task.await {
            error!("Glob tail coordinator failed: {}", e);
        }
    }
}

struct Coordinator<F, H> {
    factory: F,
    hooks: H,
    excludes: ExcludeRuleSet,
    start: StartPosition,
    tail_config: TailConfig,
    watcher: SharedWatcher,
    /// Live tailers keyed by the path they were started for
    tailers: HashMap<PathBuf, FileTailer>,
    scan_cancel: CancellationToken,
    tail_cancel: CancellationToken,
}

impl<F, C, H> Coordinator<F, H>
where
    F: FnMut(&Path) -> C + Send + 'static,
    C: TailConsumer,
    H: TailHooks,
{
    async fn run(mut self, mut events: ChannelReceiver<GlobEvent>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.tail_cancel.cancelled() => break,
                event = events.next() => match event {
                    Some(event) => event,
                    // Every scanner has stopped.
                    None => break,
                },
            };

            match event {
                GlobEvent::Found(path) => self.file_found(path).await,
                GlobEvent::Deleted(path) => {
                    // The tailer notices on its own through its missing-file handling.
                    debug!(path = ?path, "File no longer matches");
                }
            }
        }
        debug!(tailers = self.tailers.len(), "Glob tail coordinator stopped");
    }

    async fn file_found(&mut self, path: PathBuf) {
        if self.scan_cancel.is_cancelled() {
            return;
        }

        if let Some(rule) = self.excludes.matches(&path) {
            debug!(path = ?path, rule = %rule, "Path matched exclude rule");
            self.hooks.file_excluded(&path);
            return;
        }

        self.tailers.retain(|_, tailer| !tailer.is_closed() && !tailer.is_finished());
        if self.tailers.contains_key(&path) {
            debug!(path = ?path, "Already tailing path");
            return;
        }

        let consumer = (self.factory)(&path);
        // Opened off the runtime so a stalled mount delays only this file.
        match FileTailer::open_with_token(
            &path,
            self.start,
            consumer,
            &self.tail_config,
            self.watcher.clone(),
            self.tail_cancel.child_token(),
        )
        .await
        {
            Ok(tailer) => {
                info!(path = ?path, "Tailing discovered file");
                self.tailers.insert(path, tailer);
            }
            Err(e) => self.hooks.file_error(&path, &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tail::config::StartAt;
    use crate::tail::consumer::{ChannelConsumer, TailEvent};
    use crate::tail::watcher::{
        FileWatcher, PollWatcher, Subscription, WatchMode, WatcherConfig, WatcherError,
    };
    use std::fs;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    enum HookCall {
        Excluded(PathBuf),
        Error(PathBuf, String),
    }

    #[derive(Clone, Default)]
    struct RecordingHooks {
        calls: Arc<Mutex<Vec<HookCall>>>,
    }

    impl TailHooks for RecordingHooks {
        fn file_excluded(&mut self, path: &Path) {
            self.calls
                .lock()
                .unwrap()
                .push(HookCall::Excluded(path.to_path_buf()));
        }

        fn file_error(&mut self, path: &Path, error: &Error) {
            self.calls
                .lock()
                .unwrap()
                .push(HookCall::Error(path.to_path_buf(), error.to_string()));
        }
    }

    fn config(dir: &TempDir) -> GlobTailConfig {
        GlobTailConfig {
            include: vec![format!("{}/*.log", dir.path().display())],
            scan_interval: Duration::from_millis(30),
            start_at: StartAt::Beginning,
            tail: TailConfig {
                missing_file_check_interval: Duration::from_millis(20),
                symlink_check_interval: Duration::from_millis(20),
                ..Default::default()
            },
            watcher: WatcherConfig {
                mode: WatchMode::Poll,
                poll_interval: Duration::from_millis(20),
            },
            ..Default::default()
        }
    }

    async fn next_data(rx: &mut ChannelReceiver<TailEvent>) -> Option<(PathBuf, Vec<u8>)> {
        loop {
            match tokio::time::timeout(Duration::from_secs(2), rx.next()).await {
                Ok(Some(TailEvent::Data { path, bytes })) => return Some((path, bytes)),
                Ok(Some(TailEvent::Eof { .. })) => continue,
                _ => return None,
            }
        }
    }

    #[tokio::test]
    async fn test_discovered_files_are_tailed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "hello\n").unwrap();

        let (tx, mut rx) = channel::unbounded();
        let glob_tail = GlobTail::start(
            &config(&dir),
            move |_: &Path| ChannelConsumer::from_sender(tx.clone()),
            LogHooks,
        )
        .unwrap();
        assert_eq!(glob_tail.patterns().count(), 1);

        assert_eq!(next_data(&mut rx).await, Some((path, b"hello\n".to_vec())));
        glob_tail.shutdown();
        glob_tail.join().await;
    }

    #[tokio::test]
    async fn test_excluded_files_are_reported_not_tailed() {
        let dir = TempDir::new().unwrap();
        let kept = dir.path().join("app.log");
        let skipped = dir.path().join("debug.log");
        fs::write(&kept, "kept\n").unwrap();
        fs::write(&skipped, "skipped\n").unwrap();

        let mut config = config(&dir);
        config.exclude_regex = vec!["debug".to_string()];
        let hooks = RecordingHooks::default();
        let calls = hooks.calls.clone();
        let (tx, mut rx) = channel::unbounded();

        let glob_tail = GlobTail::start(
            &config,
            move |_: &Path| ChannelConsumer::from_sender(tx.clone()),
            hooks,
        )
        .unwrap();

        assert_eq!(next_data(&mut rx).await, Some((kept, b"kept\n".to_vec())));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(rx.try_recv().is_none());

        // Reported once even though several scans ran.
        assert_eq!(*calls.lock().unwrap(), vec![HookCall::Excluded(skipped)]);
        glob_tail.shutdown();
    }

    #[tokio::test]
    async fn test_directory_match_goes_to_file_error() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("nested.log");
        fs::create_dir(&sub).unwrap();

        let hooks = RecordingHooks::default();
        let calls = hooks.calls.clone();
        let glob_tail = GlobTail::start(
            &config(&dir),
            |_: &Path| |_: &crate::tail::TailContext, _: &[u8]| {},
            hooks,
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert!(matches!(&calls[0], HookCall::Error(p, _) if *p == sub));
        glob_tail.shutdown();
    }

    /// Poll watcher that stalls when subscribing to `slow.log`, like a hung
    /// network mount.
    struct StallingWatcher(PollWatcher);

    impl FileWatcher for StallingWatcher {
        fn watch(&self, path: &Path) -> std::result::Result<Subscription, WatcherError> {
            if path.ends_with("slow.log") {
                std::thread::sleep(Duration::from_millis(600));
            }
            self.0.watch(path)
        }

        fn is_native(&self) -> bool {
            false
        }

        fn backend_name(&self) -> &'static str {
            "stalling"
        }
    }

    #[tokio::test]
    async fn test_slow_open_does_not_stall_running_tailers() {
        let dir = TempDir::new().unwrap();
        let fast = dir.path().join("app.log");
        let slow = dir.path().join("slow.log");
        fs::write(&fast, "a\n").unwrap();
        fs::write(&slow, "s\n").unwrap();

        let watcher: SharedWatcher = Arc::new(StallingWatcher(
            PollWatcher::new(Duration::from_millis(20)).unwrap(),
        ));
        let (tx, mut rx) = channel::unbounded();
        let glob_tail = GlobTail::start_with_watcher(
            &config(&dir),
            watcher,
            move |_: &Path| ChannelConsumer::from_sender(tx.clone()),
            LogHooks,
        )
        .unwrap();

        assert_eq!(next_data(&mut rx).await, Some((fast.clone(), b"a\n".to_vec())));

        // slow.log is still being opened; app.log keeps flowing meanwhile.
        let mut f = fs::OpenOptions::new().append(true).open(&fast).unwrap();
        std::io::Write::write_all(&mut f, b"b\n").unwrap();
        let started = std::time::Instant::now();
        assert_eq!(next_data(&mut rx).await, Some((fast, b"b\n".to_vec())));
        assert!(started.elapsed() < Duration::from_millis(400));

        assert_eq!(next_data(&mut rx).await, Some((slow, b"s\n".to_vec())));
        glob_tail.shutdown();
        glob_tail.join().await;
    }

    #[tokio::test]
    async fn test_invalid_patterns_fail_construction() {
        let dir = TempDir::new().unwrap();
        let mut bad_include = config(&dir);
        bad_include.include.push("/tmp/[oops".to_string());
        let result = GlobTail::start(&bad_include, |_: &Path| ChannelConsumer::new().0, LogHooks);
        assert!(matches!(result, Err(Error::InvalidGlob(_))));

        let mut bad_exclude = config(&dir);
        bad_exclude.exclude_regex = vec!["(oops".to_string()];
        let result = GlobTail::start(&bad_exclude, |_: &Path| ChannelConsumer::new().0, LogHooks);
        assert!(matches!(result, Err(Error::InvalidExclude(_))));

        let empty = GlobTailConfig::default();
        let result = GlobTail::start(&empty, |_: &Path| ChannelConsumer::new().0, LogHooks);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_stop_keeps_tailers_shutdown_closes_them() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "one\n").unwrap();

        let (tx, mut rx) = channel::unbounded();
        let glob_tail = GlobTail::start(
            &config(&dir),
            move |_: &Path| ChannelConsumer::from_sender(tx.clone()),
            LogHooks,
        )
        .unwrap();
        assert!(next_data(&mut rx).await.is_some());

        glob_tail.stop();
        assert!(glob_tail.is_stopped());
        fs::write(dir.path().join("late.log"), "late\n").unwrap();
        fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| std::io::Write::write_all(&mut f, b"two\n"))
            .unwrap();

        // The existing tailer still delivers; the new file is never picked up.
        assert_eq!(next_data(&mut rx).await, Some((path.clone(), b"two\n".to_vec())));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_none());

        glob_tail.shutdown();
        glob_tail.join().await;
    }
}
