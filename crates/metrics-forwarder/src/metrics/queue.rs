//! Fixed capacity FIFO between the poller and the pusher.
//!
//! `put` waits while the queue is full and `take` waits while it is empty;
//! backpressure is the only flow control, nothing is ever dropped.

use derive_more::Display;
use tokio::sync::mpsc;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[display("queue consumer is gone")]
pub struct QueueClosed;

impl core::error::Error for QueueClosed {}

/// Create a queue holding at most `capacity` items (at least one).
pub fn bounded<T>(capacity: usize) -> (QueueProducer<T>, QueueConsumer<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueProducer { tx }, QueueConsumer { rx })
}

/// Producer half. Cloning is only meant for handing the producer to a new
/// poller instance after the previous one stopped.
#[derive(Debug)]
pub struct QueueProducer<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for QueueProducer<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> QueueProducer<T> {
    /// Enqueue `item`, suspending the caller until a slot is free.
    pub async fn put(&self, item: T) -> Result<(), QueueClosed> {
        self.tx.send(item).await.map_err(|_| QueueClosed)
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Number of items currently waiting to be taken.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct QueueConsumer<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> QueueConsumer<T> {
    /// Dequeue the oldest item, suspending while the queue is empty.
    ///
    /// Returns `None` once every producer is dropped and the queue drained.
    pub async fn take(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}
