//! Cancellation and progress plumbing shared by all backends.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use serde::Serialize;

use crate::error::FitError;

/// Cooperative cancellation flag.
///
/// Clones share the same flag. Backends poll it between iterations, before
/// each resample and between MCMC steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One progress observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// Iteration (or completed resample / MCMC step) counter.
    pub iteration: usize,
    pub residual_norm: f64,
}

/// Receiver of progress snapshots. Must never block the fitting thread.
pub trait ProgressSink: Sync {
    fn report(&self, snapshot: ProgressSnapshot);
}

/// Discards every snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _snapshot: ProgressSnapshot) {}
}

/// Bounded drop-oldest progress queue on a crossbeam channel.
///
/// The producer never waits: when the channel is full the oldest snapshot is
/// received and discarded, then the send is retried.
#[derive(Debug, Clone)]
pub struct ProgressQueue {
    sender: Sender<ProgressSnapshot>,
    receiver: Receiver<ProgressSnapshot>,
    published: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    capacity: usize,
}

impl ProgressQueue {
    pub fn new(capacity: usize) -> Self {
        // A zero-capacity channel is a rendezvous and would block the producer.
        let capacity = capacity.max(1);
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            published: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&self, snapshot: ProgressSnapshot) {
        let mut pending = snapshot;
        loop {
            match self.sender.try_send(pending) {
                Ok(()) => break,
                Err(TrySendError::Full(back)) => {
                    if self.receiver.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    pending = back;
                }
                // Unreachable while `self` holds the receiver.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
        self.published.fetch_add(1, Ordering::Release);
    }

    /// Take every queued snapshot, oldest first.
    pub fn drain(&self) -> Vec<ProgressSnapshot> {
        self.receiver.try_iter().collect()
    }

    /// Snapshots currently waiting in the queue.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Total snapshots ever pushed, including ones later dropped or drained.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    /// Number of snapshots discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Mark the producer as finished.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl ProgressSink for ProgressQueue {
    fn report(&self, snapshot: ProgressSnapshot) {
        self.push(snapshot);
    }
}

/// Per-call execution context handed to a backend.
#[derive(Clone, Copy)]
pub struct FitContext<'a> {
    pub cancel: &'a CancelToken,
    pub progress: &'a dyn ProgressSink,
}

impl<'a> FitContext<'a> {
    pub fn new(cancel: &'a CancelToken, progress: &'a dyn ProgressSink) -> Self {
        Self { cancel, progress }
    }

    /// Same cancellation token, progress discarded.
    pub fn quiet(&self) -> FitContext<'a> {
        FitContext {
            cancel: self.cancel,
            progress: &NoProgress,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn check_cancelled(&self) -> Result<(), FitError> {
        if self.is_cancelled() {
            Err(FitError::Cancelled { partial: None })
        } else {
            Ok(())
        }
    }

    pub fn report(&self, iteration: usize, residual_norm: f64) {
        self.progress.report(ProgressSnapshot {
            iteration,
            residual_norm,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(iteration: usize) -> ProgressSnapshot {
        ProgressSnapshot {
            iteration,
            residual_norm: 1.0,
        }
    }

    #[test]
    fn queue_drops_oldest_when_full() {
        let queue = ProgressQueue::new(2);
        queue.push(snap(1));
        queue.push(snap(2));
        queue.push(snap(3));
        assert_eq!(queue.dropped(), 1);
        let items: Vec<usize> = queue.drain().iter().map(|s| s.iteration).collect();
        assert_eq!(items, vec![2, 3]);
        assert!(queue.drain().is_empty());
        assert_eq!(queue.published(), 3);
    }

    #[test]
    fn concurrent_producers_never_block_or_overfill() {
        let queue = ProgressQueue::new(4);
        std::thread::scope(|scope| {
            for t in 0..8 {
                let queue = &queue;
                scope.spawn(move || {
                    for i in 0..500 {
                        queue.push(snap(t * 1000 + i));
                        assert!(queue.len() <= queue.capacity());
                    }
                });
            }
        });
        assert_eq!(queue.published(), 4000);
        let left = queue.drain().len() as u64;
        assert!(left >= 1 && left <= 4, "{left} left");
        assert_eq!(queue.dropped() + left, 4000);
    }

    #[test]
    fn zero_capacity_still_accepts_snapshots() {
        let queue = ProgressQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(snap(1));
        queue.push(snap(2));
        assert_eq!(queue.drain(), vec![snap(2)]);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        let ctx = FitContext::new(&token, &NoProgress);
        assert!(ctx.check_cancelled().unwrap_err().is_cancelled());
    }
}
