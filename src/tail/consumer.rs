// SPDX-License-Identifier: Apache-2.0

//! The receiving side of a tailer.

use std::path::PathBuf;

use tracing::debug;

use crate::channel::{self, ChannelReceiver, ChannelSender};
use crate::tail::tailer::TailContext;

/// Receives the bytes a tailer reads.
///
/// Callbacks run on the tailer's own task, one at a time, so an implementation
/// never sees two calls for the same file concurrently. They must not block;
/// hand heavy work off to another task.
pub trait TailConsumer: Send + 'static {
    /// Called once per successful read with the bytes in file order.
    fn receive_data(&mut self, ctx: &TailContext, data: &[u8]);

    /// Called each time the tailer reaches the current end of file.
    fn eof(&mut self, _ctx: &TailContext) {}
}

impl<F> TailConsumer for F
where
    F: FnMut(&TailContext, &[u8]) + Send + 'static,
{
    fn receive_data(&mut self, ctx: &TailContext, data: &[u8]) {
        self(ctx, data)
    }
}

/// What a [`ChannelConsumer`] forwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailEvent {
    Data { path: PathBuf, bytes: Vec<u8> },
    Eof { path: PathBuf },
}

impl TailEvent {
    pub fn path(&self) -> &std::path::Path {
        match self {
            TailEvent::Data { path, .. } | TailEvent::Eof { path } => path,
        }
    }
}

/// Forwards every chunk (and optionally every EOF) into a channel so async
/// code can consume a tail as a stream. The channel is unbounded; chunks are
/// never dropped.
#[derive(Debug, Clone)]
pub struct ChannelConsumer {
    tx: ChannelSender<TailEvent>,
    forward_eof: bool,
}

impl ChannelConsumer {
    pub fn new() -> (Self, ChannelReceiver<TailEvent>) {
        let (tx, rx) = channel::unbounded();
        (Self::from_sender(tx), rx)
    }

    /// Share one receiver between many tailers.
    pub fn from_sender(tx: ChannelSender<TailEvent>) -> Self {
        Self {
            tx,
            forward_eof: false,
        }
    }

    pub fn with_eof(mut self, forward_eof: bool) -> Self {
        self.forward_eof = forward_eof;
        self
    }
}

impl TailConsumer for ChannelConsumer {
    fn receive_data(&mut self, ctx: &TailContext, data: &[u8]) {
        let event = TailEvent::Data {
            path: ctx.path().to_path_buf(),
            bytes: data.to_vec(),
        };
        if self.tx.send_blocking(event).is_err() {
            debug!(path = ?ctx.path(), "Receiver dropped, closing tail");
            ctx.close();
        }
    }

    fn eof(&mut self, ctx: &TailContext) {
        if self.forward_eof {
            let event = TailEvent::Eof {
                path: ctx.path().to_path_buf(),
            };
            if self.tx.send_blocking(event).is_err() {
                ctx.close();
            }
        }
    }
}
