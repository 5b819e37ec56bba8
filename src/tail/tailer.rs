// SPDX-License-Identifier: Apache-2.0

//! Single-file tailing.
//!
//! Each [`FileTailer`] is backed by one tokio task that exclusively owns the
//! open handle, the read position, the watch subscription and the last
//! metadata snapshot. Every timer and notification is a branch of one
//! `select!` loop, so state transitions never race each other.
//!
//! State machine, roughly:
//! - a pending read drains the file chunk by chunk, rescheduling itself
//!   immediately while data keeps coming;
//! - at EOF the consumer's `eof` hook runs, then the path is re-probed:
//!   a different file (or symlink target) means drain the old handle and
//!   reopen, a smaller size means seek back to 0, a vanished path closes the
//!   handle and its subscription and starts the missing-file retry loop;
//! - `Moved` notifications defer the reopen until the old file is drained.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{self, ChannelReceiver, ChannelSender};
use crate::tail::config::{StartPosition, TailConfig};
use crate::tail::consumer::TailConsumer;
use crate::tail::error::{Error, Result};
use crate::tail::probe::{FileChange, FileMetadataSnapshot};
use crate::tail::watcher::{SharedWatcher, Subscription, WatchEvent};

/// First delay after a failed read; doubles per consecutive failure.
const MIN_ERROR_BACKOFF: Duration = Duration::from_millis(10);
const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// The tailer as seen from inside a consumer callback.
#[derive(Debug, Clone)]
pub struct TailContext {
    path: Arc<PathBuf>,
    position: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl TailContext {
    fn new(path: PathBuf, cancel: CancellationToken) -> Self {
        Self {
            path: Arc::new(path),
            position: Arc::new(AtomicU64::new(0)),
            cancel,
        }
    }

    /// A context that is not attached to any running tailer.
    pub fn detached(path: impl Into<PathBuf>) -> Self {
        Self::new(path.into(), CancellationToken::new())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the next byte to be read from the current file.
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    /// Stop tailing. Safe to call from a callback; the handle is released on
    /// the tailer's next scheduling turn.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug)]
enum Control {
    SymlinkCheckInterval(Duration),
    MissingFileCheckInterval(Duration),
}

/// An opened and subscribed tailer whose task has not been spawned yet.
struct Pending<C> {
    tailer: Tailer<C>,
    control: ChannelSender<Control>,
}

impl<C: TailConsumer> Pending<C> {
    fn spawn(self) -> FileTailer {
        let Pending { tailer, control } = self;
        let ctx = tailer.ctx.clone();
        let symlink_check_interval = tailer.symlink_check_interval;
        let missing_file_check_interval = tailer.missing_file_check_interval;
        FileTailer {
            ctx,
            control,
            symlink_check_interval,
            missing_file_check_interval,
            task: tokio::spawn(tailer.run()),
        }
    }
}

/// Handle to a running tailer.
///
/// Dropping the handle does not stop tailing; call [`close`](Self::close).
#[derive(Debug)]
pub struct FileTailer {
    ctx: TailContext,
    control: ChannelSender<Control>,
    symlink_check_interval: Duration,
    missing_file_check_interval: Duration,
    task: JoinHandle<()>,
}

impl FileTailer {
    /// Open `path` and start following it on a new task.
    ///
    /// Fails with [`Error::FileNotFound`], [`Error::IsDirectory`] or
    /// [`Error::PermissionDenied`] when the path can't be tailed. With
    /// [`StartPosition::Offset`] the first read is scheduled immediately; with
    /// [`StartPosition::End`] nothing is read until the file changes.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<C: TailConsumer>(
        path: impl AsRef<Path>,
        start: StartPosition,
        consumer: C,
        config: &TailConfig,
        watcher: SharedWatcher,
    ) -> Result<Self> {
        Self::start_with_token(path, start, consumer, config, watcher, CancellationToken::new())
    }

    pub(crate) fn start_with_token<C: TailConsumer>(
        path: impl AsRef<Path>,
        start: StartPosition,
        consumer: C,
        config: &TailConfig,
        watcher: SharedWatcher,
        cancel: CancellationToken,
    ) -> Result<Self> {
        Ok(Self::prepare(path.as_ref(), start, consumer, config, watcher, cancel)?.spawn())
    }

    /// Like [`start`](Self::start), but the file is opened and subscribed to
    /// on the blocking pool, so the calling task is never stalled by a slow
    /// file system.
    pub async fn open<C: TailConsumer>(
        path: impl AsRef<Path>,
        start: StartPosition,
        consumer: C,
        config: &TailConfig,
        watcher: SharedWatcher,
    ) -> Result<Self> {
        Self::open_with_token(path, start, consumer, config, watcher, CancellationToken::new())
            .await
    }

    pub(crate) async fn open_with_token<C: TailConsumer>(
        path: impl AsRef<Path>,
        start: StartPosition,
        consumer: C,
        config: &TailConfig,
        watcher: SharedWatcher,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let config = config.clone();
        let pending = tokio::task::spawn_blocking(move || {
            Self::prepare(&path, start, consumer, &config, watcher, cancel)
        })
        .await
        .map_err(io::Error::other)??;
        Ok(pending.spawn())
    }

    /// Everything up to spawning the task. Blocks on file system calls.
    fn prepare<C: TailConsumer>(
        path: &Path,
        start: StartPosition,
        consumer: C,
        config: &TailConfig,
        watcher: SharedWatcher,
        cancel: CancellationToken,
    ) -> Result<Pending<C>> {
        config.validate().map_err(Error::Config)?;
        let path = path.to_path_buf();

        let metadata = std::fs::metadata(&path).map_err(|e| Error::from_io(&path, e))?;
        if metadata.is_dir() {
            return Err(Error::IsDirectory(path));
        }

        let mut file = std::fs::File::open(&path).map_err(|e| Error::from_io(&path, e))?;
        let snapshot =
            FileMetadataSnapshot::for_open_file(&path, &file).map_err(|e| Error::from_io(&path, e))?;

        let position = {
            use std::io::Seek;
            match start {
                StartPosition::End => file.seek(SeekFrom::End(0))?,
                StartPosition::Offset(offset) => file.seek(SeekFrom::Start(offset))?,
            }
        };

        let subscription = watcher.watch(&path)?;

        let ctx = TailContext::new(path, cancel);
        ctx.position.store(position, Ordering::Relaxed);

        let (control_tx, control_rx) = channel::unbounded();
        let now = Instant::now();
        let tailer = Tailer {
            ctx,
            consumer,
            watcher,
            file: Some(tokio::fs::File::from_std(file)),
            subscription: Some(subscription),
            symlink_check_at: snapshot
                .is_symlink
                .then(|| now + config.symlink_check_interval),
            snapshot,
            position,
            backoff: Duration::ZERO,
            buf: vec![0u8; config.chunk_size],
            read_at: matches!(start, StartPosition::Offset(_)).then_some(now),
            reopen_at: None,
            reopen_on_eof: false,
            symlink_check_interval: config.symlink_check_interval,
            missing_file_check_interval: config.missing_file_check_interval,
            control: control_rx,
        };

        debug!(
            path = ?tailer.ctx.path(),
            position,
            start = ?start,
            "Tailing file"
        );

        Ok(Pending {
            tailer,
            control: control_tx,
        })
    }

    pub fn path(&self) -> &Path {
        self.ctx.path()
    }

    /// Offset of the next byte to be read from the current file.
    pub fn position(&self) -> u64 {
        self.ctx.position()
    }

    pub fn symlink_check_interval(&self) -> Duration {
        self.symlink_check_interval
    }

    pub fn set_symlink_check_interval(&mut self, interval: Duration) {
        self.symlink_check_interval = interval;
        let _ = self
            .control
            .send_blocking(Control::SymlinkCheckInterval(interval));
    }

    pub fn missing_file_check_interval(&self) -> Duration {
        self.missing_file_check_interval
    }

    pub fn set_missing_file_check_interval(&mut self, interval: Duration) {
        self.missing_file_check_interval = interval;
        let _ = self
            .control
            .send_blocking(Control::MissingFileCheckInterval(interval));
    }

    /// Stop tailing. Never blocks; no reads or reopens happen afterwards.
    pub fn close(&self) {
        self.ctx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.ctx.is_closed()
    }

    /// Whether the tailer task has exited and released its handle.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the tailer task to exit. Only returns after [`close`](Self::close)
    /// has been called, here or from a consumer callback.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(path = ?self.ctx.path(), "Tailer task failed: {}", e);
        }
    }
}

enum Step {
    Close,
    Read,
    Reopen,
    Notify(WatchEvent),
    CheckSymlink,
    Control(Control),
}

struct Tailer<C> {
    ctx: TailContext,
    consumer: C,
    watcher: SharedWatcher,
    file: Option<tokio::fs::File>,
    subscription: Option<Subscription>,
    /// Kept until a newer snapshot has been compared against it
    snapshot: FileMetadataSnapshot,
    position: u64,
    backoff: Duration,
    buf: Vec<u8>,
    /// Pending read; at most one at a time
    read_at: Option<Instant>,
    /// Pending reopen attempt (missing-file retry loop)
    reopen_at: Option<Instant>,
    reopen_on_eof: bool,
    symlink_check_at: Option<Instant>,
    symlink_check_interval: Duration,
    missing_file_check_interval: Duration,
    control: ChannelReceiver<Control>,
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn next_event(subscription: &mut Option<Subscription>) -> WatchEvent {
    match subscription {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}

async fn open_path(path: &Path) -> io::Result<(tokio::fs::File, FileMetadataSnapshot)> {
    let metadata = tokio::fs::metadata(path).await?;
    if metadata.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::IsADirectory,
            "path is now a directory",
        ));
    }
    let file = tokio::fs::File::open(path).await?.into_std().await;
    let snapshot = FileMetadataSnapshot::for_open_file(path, &file)?;
    Ok((tokio::fs::File::from_std(file), snapshot))
}

fn next_backoff(current: Duration) -> Duration {
    if current.is_zero() {
        MIN_ERROR_BACKOFF
    } else {
        (current * 2).min(MAX_ERROR_BACKOFF)
    }
}

impl<C: TailConsumer> Tailer<C> {
    async fn run(mut self) {
        loop {
            let step = tokio::select! {
                biased;

                _ = self.ctx.cancel.cancelled() => Step::Close,
                _ = wait_until(self.reopen_at) => Step::Reopen,
                _ = wait_until(self.read_at) => Step::Read,
                event = next_event(&mut self.subscription) => Step::Notify(event),
                _ = wait_until(self.symlink_check_at) => Step::CheckSymlink,
                Some(control) = self.control.next() => Step::Control(control),
            };

            match step {
                Step::Close => break,
                Step::Read => {
                    self.read_at = None;
                    self.read().await;
                }
                Step::Reopen => {
                    self.reopen_at = None;
                    self.reopen().await;
                }
                Step::Notify(event) => self.notify(event),
                Step::CheckSymlink => {
                    self.symlink_check_at = None;
                    self.check_symlink().await;
                }
                Step::Control(control) => self.apply(control),
            }
        }

        self.file = None;
        self.subscription = None;
        debug!(path = ?self.ctx.path(), position = self.position, "Tail closed");
    }

    fn schedule_read(&mut self) {
        if self.read_at.is_none() {
            self.read_at = Some(Instant::now() + self.backoff);
        }
    }

    fn schedule_reopen(&mut self) {
        if self.reopen_at.is_none() {
            self.reopen_at = Some(Instant::now() + self.missing_file_check_interval);
        }
    }

    fn schedule_symlink_check(&mut self) {
        self.symlink_check_at = self
            .snapshot
            .is_symlink
            .then(|| Instant::now() + self.symlink_check_interval);
    }

    fn set_position(&mut self, position: u64) {
        self.position = position;
        self.ctx.position.store(position, Ordering::Relaxed);
    }

    fn notify(&mut self, event: WatchEvent) {
        debug!(path = ?self.ctx.path(), event = ?event, "Watch event");
        match event {
            WatchEvent::Modified => {}
            WatchEvent::Moved => self.reopen_on_eof = true,
            WatchEvent::Deleted => {}
            WatchEvent::Unsubscribed => self.subscription = None,
        }
        // Every event ends up at the next EOF check, which is where rotation,
        // truncation and disappearance are resolved.
        self.schedule_read();
    }

    fn apply(&mut self, control: Control) {
        match control {
            Control::SymlinkCheckInterval(interval) => {
                self.symlink_check_interval = interval;
                if self.symlink_check_at.is_some() {
                    self.schedule_symlink_check();
                }
            }
            Control::MissingFileCheckInterval(interval) => {
                self.missing_file_check_interval = interval;
                if self.reopen_at.is_some() {
                    self.reopen_at = Some(Instant::now() + interval);
                }
            }
        }
    }

    /// One chunk from the current position.
    async fn read_chunk(&mut self) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.read(&mut self.buf).await,
            None => Ok(0),
        }
    }

    fn deliver(&mut self, n: usize) {
        self.set_position(self.position + n as u64);
        self.consumer.receive_data(&self.ctx, &self.buf[..n]);
    }

    async fn read(&mut self) {
        if self.ctx.is_closed() {
            return;
        }

        match self.read_chunk().await {
            Ok(0) => self.handle_eof().await,
            Ok(n) => {
                self.backoff = Duration::ZERO;
                self.deliver(n);
                if !self.ctx.is_closed() {
                    self.schedule_read();
                }
            }
            Err(e) => {
                self.backoff = next_backoff(self.backoff);
                warn!(
                    path = ?self.ctx.path(),
                    position = self.position,
                    backoff = ?self.backoff,
                    "Error reading file: {}", e
                );
                self.schedule_read();
            }
        }
    }

    /// Read the current handle to its end before it is replaced.
    async fn drain(&mut self) {
        loop {
            if self.ctx.is_closed() {
                return;
            }
            match self.read_chunk().await {
                Ok(0) => return,
                Ok(n) => self.deliver(n),
                Err(e) => {
                    warn!(path = ?self.ctx.path(), "Error draining rotated file: {}", e);
                    return;
                }
            }
        }
    }

    async fn handle_eof(&mut self) {
        self.consumer.eof(&self.ctx);
        if self.ctx.is_closed() {
            return;
        }

        if self.reopen_on_eof {
            self.reopen_on_eof = false;
            info!(path = ?self.ctx.path(), "File moved, reopening");
            self.reopen().await;
            return;
        }

        if self.file.is_none() {
            self.reopen().await;
            return;
        }

        match FileMetadataSnapshot::probe_async(self.ctx.path()).await {
            Ok(next) => self.handle_snapshot(next).await,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?self.ctx.path(), "File missing, waiting for it to reappear");
                // An unlinked file keeps its disk space for as long as it is open.
                self.file = None;
                self.subscription = None;
                self.schedule_reopen();
            }
            Err(e) => {
                warn!(path = ?self.ctx.path(), "Failed to stat file: {}", e);
                self.schedule_reopen();
            }
        }
    }

    async fn handle_snapshot(&mut self, next: FileMetadataSnapshot) {
        match self.snapshot.compare(&next, self.position) {
            change if change.needs_reopen() => {
                info!(
                    path = ?self.ctx.path(),
                    change = ?change,
                    old = %self.snapshot.identity,
                    new = %next.identity,
                    "File rotated, reopening"
                );
                self.drain().await;
                self.reopen().await;
            }
            FileChange::Truncated => {
                info!(
                    path = ?self.ctx.path(),
                    position = self.position,
                    size = next.size,
                    "File truncated, reading from start"
                );
                self.snapshot = next;
                if let Some(file) = self.file.as_mut() {
                    if let Err(e) = file.seek(SeekFrom::Start(0)).await {
                        warn!(path = ?self.ctx.path(), "Failed to rewind truncated file: {}", e);
                        self.schedule_reopen();
                        return;
                    }
                }
                self.set_position(0);
                self.schedule_read();
            }
            _ => {
                self.snapshot = next;
                if self.subscription.is_none() {
                    self.resubscribe();
                }
            }
        }
    }

    /// Watch the path again after the previous subscription died. Without a
    /// subscription, fall back to polling reads.
    fn resubscribe(&mut self) {
        match self.watcher.watch(self.ctx.path()) {
            Ok(sub) => {
                debug!(path = ?self.ctx.path(), "Re-subscribed to file changes");
                self.subscription = Some(sub);
            }
            Err(e) => {
                debug!(path = ?self.ctx.path(), "Watch unavailable, polling: {}", e);
                self.read_at = Some(Instant::now() + self.missing_file_check_interval);
            }
        }
    }

    async fn reopen(&mut self) {
        if self.ctx.is_closed() {
            return;
        }

        let (file, snapshot) = match open_path(self.ctx.path()).await {
            Ok(opened) => opened,
            Err(e) => {
                if e.kind() == io::ErrorKind::NotFound {
                    debug!(path = ?self.ctx.path(), "File missing, will retry");
                    self.file = None;
                    self.subscription = None;
                } else {
                    warn!(path = ?self.ctx.path(), "Failed to reopen file, will retry: {}", e);
                }
                self.schedule_reopen();
                return;
            }
        };

        // Cancel the old watch before creating the new one.
        self.subscription = None;
        self.file = Some(file);
        self.snapshot = snapshot;
        self.set_position(0);
        self.backoff = Duration::ZERO;
        self.reopen_at = None;
        self.reopen_on_eof = false;
        self.resubscribe();
        self.schedule_symlink_check();
        self.read_at = Some(Instant::now());

        info!(
            path = ?self.ctx.path(),
            identity = %self.snapshot.identity,
            "Reopened file"
        );
    }

    async fn check_symlink(&mut self) {
        if self.ctx.is_closed() {
            return;
        }
        match FileMetadataSnapshot::probe_async(self.ctx.path()).await {
            Ok(next) if self.snapshot.link_changed(&next) => {
                info!(
                    path = ?self.ctx.path(),
                    target = ?next.symlink_target,
                    "Symlink changed, reopening after draining"
                );
                self.reopen_on_eof = true;
                self.schedule_read();
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.schedule_read(),
            Err(e) => debug!(path = ?self.ctx.path(), "Symlink check failed: {}", e),
        }
        self.schedule_symlink_check();
    }
}
