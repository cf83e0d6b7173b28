//! Ordered blocking channel used for every stage hand-off.
//!
//! A thin pair of handles over an unbounded `crossbeam-channel`:
//! [`Producer::push`] never blocks and [`Consumer::wait_and_pop`] suspends the
//! caller until an item arrives. Items come out in FIFO order, each exactly
//! once, to exactly one consumer. Both handles are cloneable, so several
//! producers or consumers may share a channel.
//!
//! Stages detect the end of their work from the payload (the `last` flag or a
//! known segment count). A closed channel only means the peer stage aborted,
//! and is reported as [`PipelineError::ChannelClosed`].

use crossbeam_channel::{self as channel, Receiver, Sender, TryRecvError};

use crate::error::{PipelineError, Result};

/// Sending half of an ordered channel.
#[derive(Debug)]
pub struct Producer<T> {
    tx: Sender<T>,
    stage: &'static str,
}

/// Receiving half of an ordered channel.
#[derive(Debug)]
pub struct Consumer<T> {
    rx: Receiver<T>,
    stage: &'static str,
}

/// Create an unbounded ordered channel.
///
/// `stage` names the hop in error messages (e.g. `"scan"` for the scan →
/// extraction channel).
pub fn ordered_channel<T>(stage: &'static str) -> (Producer<T>, Consumer<T>) {
    let (tx, rx) = channel::unbounded();
    (Producer { tx, stage }, Consumer { rx, stage })
}

impl<T> Producer<T> {
    /// Append an item. Never blocks.
    ///
    /// Fails only when every consumer has been dropped.
    pub fn push(&self, item: T) -> Result<()> {
        self.tx
            .send(item)
            .map_err(|_| PipelineError::ChannelClosed { stage: self.stage })
    }
}

impl<T> Consumer<T> {
    /// Block until an item is available and return it.
    pub fn wait_and_pop(&self) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| PipelineError::ChannelClosed { stage: self.stage })
    }

    /// Pop an item if one is queued, without blocking.
    pub fn try_pop(&self) -> Result<Option<T>> {
        match self.rx.try_recv() {
            Ok(item) => Ok(Some(item)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                Err(PipelineError::ChannelClosed { stage: self.stage })
            }
        }
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True if no item is queued.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            stage: self.stage,
        }
    }
}

impl<T> Clone for Consumer<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            stage: self.stage,
        }
    }
}
