// SPDX-License-Identifier: Apache-2.0

//! Following growing files and discovering new ones.
//!
//! The building blocks are:
//! - [`FileTailer`]: follows one path across appends, truncation, rotation,
//!   deletion and symlink retargeting, handing bytes to a [`TailConsumer`].
//! - [`GlobScanner`]: periodically expands a glob and reports files that
//!   appear or disappear, tracking them by [`FileIdentity`].
//! - [`GlobTail`]: combines the two, spawning a tailer per discovered file
//!   that isn't matched by an [`ExcludeRuleSet`].
//!
//! Change notifications come from a [`FileWatcher`] backend, either native
//! OS notifications or stat polling.

pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod error;
pub mod exclude;
pub mod identity;
pub mod probe;
pub mod scanner;
pub mod tailer;
pub mod watcher;

pub use config::{GlobTailConfig, StartAt, StartPosition, TailConfig};
pub use consumer::{ChannelConsumer, TailConsumer, TailEvent};
pub use coordinator::{GlobTail, LogHooks, TailHooks};
pub use error::{Error, Result};
pub use exclude::{ExcludeRule, ExcludeRuleSet};
pub use identity::FileIdentity;
pub use probe::{FileChange, FileMetadataSnapshot};
pub use scanner::{GlobEvent, GlobHandler, GlobScanner};
pub use tailer::{FileTailer, TailContext};
pub use watcher::{
    FileWatcher, NativeWatcher, PollWatcher, SharedWatcher, Subscription, WatchEvent, WatchMode,
    WatcherConfig, WatcherError, create_watcher,
};
