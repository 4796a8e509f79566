use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::metrics::Poller;
use crate::metrics::SnapshotSource;

type SpawnPoller = Box<dyn Fn(CancellationToken) -> JoinHandle<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

struct RunningPoller {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Start/stop switch for the poller driven by the activation API.
///
/// At most one poller runs at a time. Start and stop are serialized by the
/// slot lock; starting a running poller is a no-op and stopping cancels it
/// and waits for it to exit.
pub struct CollectionControl {
    spawn: SpawnPoller,
    running: Mutex<Option<RunningPoller>>,
    shutdown: CancellationToken,
}

impl CollectionControl {
    /// `shutdown` cancels any poller started through this control.
    pub fn new<S: SnapshotSource>(poller: Poller<S>, shutdown: CancellationToken) -> Self {
        Self {
            spawn: Box::new(move |token| tokio::spawn(poller.clone().run(token))),
            running: Mutex::new(None),
            shutdown,
        }
    }

    pub async fn start(&self) -> StartOutcome {
        let mut slot = self.running.lock().await;
        if slot
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
        {
            info!("Metrics collection already running");
            return StartOutcome::AlreadyRunning;
        }

        let token = self.shutdown.child_token();
        let handle = (self.spawn)(token.clone());
        *slot = Some(RunningPoller { token, handle });
        info!("Metrics collection started");
        StartOutcome::Started
    }

    pub async fn stop(&self) -> StopOutcome {
        let mut slot = self.running.lock().await;
        let Some(running) = slot.take() else {
            info!("Metrics collection is not running");
            return StopOutcome::NotRunning;
        };

        running.token.cancel();
        if let Err(e) = running.handle.await {
            warn!("Poller task ended abnormally: {e}");
        }
        info!("Metrics collection stopped");
        StopOutcome::Stopped
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }
}
