//! Bounded, best-effort feed of bucket snapshots.

use crate::types::{CacheKey, Item, TimeBucket};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Copy of one time bucket taken right after a save.
#[derive(Clone, Debug, PartialEq)]
pub struct BucketSnapshot<T> {
    pub bucket: TimeBucket,
    pub items: HashMap<CacheKey, Item<T>>,
}

/// Sending side owned by a cache. Never blocks.
pub(crate) struct Feed<T> {
    sender: Sender<BucketSnapshot<T>>,
    receiver: Receiver<BucketSnapshot<T>>,
    dropped: AtomicU64,
}

impl<T> Feed<T> {
    /// A zero capacity is raised to one.
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            dropped: AtomicU64::new(0),
        }
    }

    /// Whether a publish right now would likely be accepted.
    pub(crate) fn has_room(&self) -> bool {
        !self.sender.is_full()
    }

    /// Try to enqueue a snapshot. Returns false if it was dropped.
    pub(crate) fn publish(&self, snapshot: BucketSnapshot<T>) -> bool {
        match self.sender.try_send(snapshot) {
            Ok(()) => true,
            Err(TrySendError::Full(snapshot)) | Err(TrySendError::Disconnected(snapshot)) => {
                self.record_drop(snapshot.bucket);
                false
            }
        }
    }

    pub(crate) fn record_drop(&self, bucket: TimeBucket) {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::trace!(?bucket, total, "feed full, dropping bucket snapshot");
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn subscribe(&self) -> FeedHandle<T> {
        FeedHandle {
            receiver: self.receiver.clone(),
        }
    }
}

/// Reading side of a cache feed.
///
/// Handles share one queue: each snapshot is delivered to exactly one of
/// the handles reading concurrently.
pub struct FeedHandle<T> {
    receiver: Receiver<BucketSnapshot<T>>,
}

impl<T> Clone for FeedHandle<T> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
        }
    }
}

impl<T> FeedHandle<T> {
    /// Receive the next snapshot (blocking).
    pub fn recv(&self) -> Result<BucketSnapshot<T>, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a snapshot (non-blocking).
    pub fn try_recv(&self) -> Result<BucketSnapshot<T>, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<BucketSnapshot<T>, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Number of snapshots currently buffered.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Underlying channel, for use in `crossbeam_channel::select!`.
    pub fn receiver(&self) -> &Receiver<BucketSnapshot<T>> {
        &self.receiver
    }
}
