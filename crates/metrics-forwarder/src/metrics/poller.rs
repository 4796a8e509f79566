use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval_at;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::family::MetricFamily;
use super::queue::QueueProducer;
use super::source::SnapshotSource;

/// Default poll interval when none (or an invalid one) is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// What happened during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// all families of the snapshot were enqueued
    Enqueued(usize),
    /// the source failed, nothing was enqueued
    Skipped,
    /// the queue consumer is gone or the poller was cancelled mid-enqueue
    Stopped,
}

/// Timer driven producer: one snapshot per tick into the bounded queue.
///
/// Ticks that elapse while the poller is still busy (slow source or a full
/// queue) are coalesced, never replayed.
pub struct Poller<S> {
    source: Arc<S>,
    producer: QueueProducer<MetricFamily>,
    interval: Duration,
}

impl<S> Clone for Poller<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            producer: self.producer.clone(),
            interval: self.interval,
        }
    }
}

impl<S: SnapshotSource> Poller<S> {
    pub fn new(source: Arc<S>, producer: QueueProducer<MetricFamily>, interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_POLL_INTERVAL
        } else {
            interval
        };
        Self {
            source,
            producer,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll until `token` is cancelled or the queue consumer disappears.
    /// The first poll happens one interval after start.
    pub async fn run(self, token: CancellationToken) {
        info!(interval = ?self.interval, "Poller started");
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Poller cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    if self.tick(&token).await == TickOutcome::Stopped {
                        break;
                    }
                }
            }
        }
        info!("Poller stopped");
    }

    /// Run a single poll: fetch a snapshot and enqueue every family of it.
    pub async fn tick(&self, token: &CancellationToken) -> TickOutcome {
        let families = match self.source.fetch().await {
            Ok(families) => families,
            Err(report) => {
                warn!("Failed to poll metrics source, skipping tick: {report:?}");
                return TickOutcome::Skipped;
            }
        };

        let total = families.len();
        for family in families {
            tokio::select! {
                _ = token.cancelled() => return TickOutcome::Stopped,
                result = self.producer.put(family) => {
                    if let Err(e) = result {
                        warn!("Cannot enqueue metric family: {e}");
                        return TickOutcome::Stopped;
                    }
                }
            }
        }
        debug!(families = total, queued = self.producer.len(), "Snapshot enqueued");
        TickOutcome::Enqueued(total)
    }
}
