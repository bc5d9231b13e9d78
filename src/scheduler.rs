//! Marshaling of job completions onto the host's cooperative thread.

use std::fmt;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// A unit of work to run later on the host thread.
pub type ScheduledTask = Box<dyn FnOnce() + Send + 'static>;

/// The host's single-threaded loop, as seen by the engine.
///
/// Implementations must run every scheduled task exactly once, in the order
/// scheduled, on one thread, and never on the caller's thread inline.
pub trait MainScheduler: Send + Sync + 'static {
    fn schedule(&self, task: ScheduledTask);
}

/// Single-consumer task queue for hosts without a loop of their own.
///
/// The host pumps it once per tick with [`TickQueue::run_pending`], or awaits
/// [`TickQueue::run_next`] from an async loop.
pub struct TickQueue {
    sender: UnboundedSender<ScheduledTask>,
    receiver: UnboundedReceiver<ScheduledTask>,
}

/// Cloneable producer side of a [`TickQueue`].
#[derive(Clone)]
pub struct TickScheduler {
    sender: UnboundedSender<ScheduledTask>,
}

impl TickQueue {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver }
    }

    #[must_use]
    pub fn scheduler(&self) -> TickScheduler {
        TickScheduler {
            sender: self.sender.clone(),
        }
    }

    /// Run every task queued so far on the current thread. Returns how many ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.receiver.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Wait for the next task and run it.
    pub async fn run_next(&mut self) -> bool {
        // The queue owns a sender, so `recv` only returns None if that invariant breaks.
        match self.receiver.recv().await {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for TickQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TickQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickQueue")
            .field("pending", &self.len())
            .finish()
    }
}

impl MainScheduler for TickScheduler {
    fn schedule(&self, task: ScheduledTask) {
        if self.sender.send(task).is_err() {
            tracing::warn!("tick queue dropped; discarding scheduled completion");
        }
    }
}

impl fmt::Debug for TickScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickScheduler").finish_non_exhaustive()
    }
}
