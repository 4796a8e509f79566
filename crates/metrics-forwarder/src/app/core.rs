use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::api::ActivationServer;
use crate::app::tasks::Tasks;
use crate::app::CollectionControl;
use crate::delivery::DeliveryClient;
use crate::metrics::Pusher;

/// Application core structure with explicit dependencies
pub struct Application {
    pusher: Pusher<DeliveryClient>,
    server: ActivationServer,
    control: Arc<CollectionControl>,
    shutdown: CancellationToken,
}

impl Application {
    pub fn new(
        pusher: Pusher<DeliveryClient>,
        server: ActivationServer,
        control: Arc<CollectionControl>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pusher,
            server,
            control,
            shutdown,
        }
    }

    /// Run the pusher and the activation server until a shutdown signal
    /// arrives or one of them exits.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting all application tasks...");

        let mut tasks = Tasks::new(self.shutdown.clone());
        tasks.spawn_pusher_task(self.pusher);
        tasks.spawn_activation_server_task(self.server);

        let result = tasks.wait_for_completion().await;
        if let Err(e) = &result {
            tracing::error!("Error during task execution: {e}");
        }

        let outcome = self.control.stop().await;
        tracing::debug!(?outcome, "Metrics collection released");
        tracing::info!("Application run completed");
        result
    }
}
