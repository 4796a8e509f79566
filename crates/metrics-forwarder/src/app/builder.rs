use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::api::ActivationServer;
use crate::app::CollectionControl;
use crate::app::Application;
use crate::config::DaemonArgs;
use crate::config::PipelineConfig;
use crate::delivery::DeliveryClient;
use crate::metrics::queue;
use crate::metrics::MetricsSource;
use crate::metrics::Poller;
use crate::metrics::Pusher;

/// Application builder
pub struct ApplicationBuilder {
    daemon_args: DaemonArgs,
}

impl ApplicationBuilder {
    pub fn new(daemon_args: DaemonArgs) -> Self {
        Self { daemon_args }
    }

    /// Resolve the configuration, check the ingestion endpoint and bind the
    /// activation socket. Any failure here is fatal.
    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");

        let config = PipelineConfig::from_args(&self.daemon_args.pipeline)
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {e:?}"))?;
        config.log_summary();

        let delivery = DeliveryClient::new(config.delivery.clone())
            .map_err(|e| anyhow::anyhow!("Failed to create delivery client: {e:?}"))?;
        delivery
            .check_connectivity()
            .await
            .map_err(|e| anyhow::anyhow!("Connectivity check failed: {e:?}"))?;

        let shutdown = CancellationToken::new();
        let (producer, consumer) = queue::bounded(config.queue_capacity);
        let source = Arc::new(MetricsSource::new(&config.metrics_socket));
        let poller = Poller::new(source, producer, config.poll_interval);
        let control = Arc::new(CollectionControl::new(poller, shutdown.clone()));
        let pusher = Pusher::new(Arc::new(config.rules.clone()), delivery, consumer);

        let server = ActivationServer::bind(&self.daemon_args.plugin_socket, control.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start activation server: {e:?}"))?;

        Ok(Application::new(pusher, server, control, shutdown))
    }
}
