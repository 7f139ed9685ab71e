//! Delivery of observer notifications on the context the UI requires.

use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// A unit of notification work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs notification jobs on the execution context the UI requires
pub trait Dispatcher: Send + Sync {
    /// Queue or run `job`
    fn dispatch(&self, job: Job);
}

/// Runs every job immediately on the calling task
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: Job) {
        job();
    }
}

/// Sends jobs to a [`DispatchQueue`] drained by the UI owner
#[derive(Clone)]
pub struct ChannelDispatcher {
    tx: Sender<Job>,
}

impl fmt::Debug for ChannelDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelDispatcher").finish_non_exhaustive()
    }
}

impl ChannelDispatcher {
    /// Create a dispatcher and the queue it feeds
    pub fn new() -> (Self, DispatchQueue) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, DispatchQueue { rx })
    }
}

impl Dispatcher for ChannelDispatcher {
    fn dispatch(&self, job: Job) {
        if self.tx.send(job).is_err() {
            tracing::debug!("Dispatch queue closed; dropping notification");
        }
    }
}

/// Receiving end of a [`ChannelDispatcher`]
pub struct DispatchQueue {
    rx: Receiver<Job>,
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue").finish_non_exhaustive()
    }
}

impl DispatchQueue {
    /// Run every queued job without waiting; returns how many ran
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one job and run it.
    ///
    /// Returns `false` on timeout or when every dispatcher is gone.
    pub fn run_next(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(job) => {
                job();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_inline_runs_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        InlineDispatcher.dispatch(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_channel_defers_until_drained() {
        let (dispatcher, queue) = ChannelDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = counter.clone();
            dispatcher.dispatch(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(queue.run_pending(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(!queue.run_next(Duration::from_millis(1)));
    }

    #[test]
    fn test_closed_queue_drops_jobs() {
        let (dispatcher, queue) = ChannelDispatcher::new();
        drop(queue);
        dispatcher.dispatch(Box::new(|| {}));
    }
}
