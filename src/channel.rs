// SPDX-License-Identifier: Apache-2.0

//! Thin wrappers over `flume` channels.
//!
//! Watch backends push events from their own OS threads (non-async), while
//! tailer tasks consume them with `.await`, so both sides need to be usable
//! from sync and async code.

use flume::{Receiver, Sender, TrySendError};
use std::fmt;

pub struct ChannelSender<T> {
    tx: Sender<T>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    Disconnected,
    Full,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected => write!(f, "channel disconnected"),
            SendError::Full => write!(f, "channel full"),
        }
    }
}

impl std::error::Error for SendError {}

impl<T> ChannelSender<T> {
    pub async fn send(&self, item: T) -> Result<(), SendError> {
        self.tx
            .send_async(item)
            .await
            .map_err(|_| SendError::Disconnected)
    }

    /// Blocking send. Never blocks on an unbounded channel.
    pub fn send_blocking(&self, item: T) -> Result<(), SendError> {
        self.tx.send(item).map_err(|_| SendError::Disconnected)
    }

    /// Non-blocking send; fails with `Full` instead of waiting for capacity.
    pub fn try_send(&self, item: T) -> Result<(), SendError> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SendError::Full),
            Err(TrySendError::Disconnected(_)) => Err(SendError::Disconnected),
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.tx.is_disconnected()
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<T> Clone for ChannelSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> fmt::Debug for ChannelSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSender")
            .field("len", &self.tx.len())
            .finish()
    }
}

pub struct ChannelReceiver<T> {
    rx: Receiver<T>,
}

impl<T> ChannelReceiver<T> {
    /// Waits for the next item; `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Returns immediately with `None` if nothing is queued or the channel is
    /// disconnected.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> fmt::Debug for ChannelReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelReceiver")
            .field("len", &self.rx.len())
            .finish()
    }
}

pub fn bounded<T>(size: usize) -> (ChannelSender<T>, ChannelReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);
    (ChannelSender { tx }, ChannelReceiver { rx })
}

pub fn unbounded<T>() -> (ChannelSender<T>, ChannelReceiver<T>) {
    let (tx, rx) = flume::unbounded::<T>();
    (ChannelSender { tx }, ChannelReceiver { rx })
}
