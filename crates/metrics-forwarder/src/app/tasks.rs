use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::ActivationServer;
use crate::delivery::LineSink;
use crate::metrics::Pusher;

/// Task manager, responsible for starting and managing all background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Tasks {
    pub fn new(cancellation_token: CancellationToken) -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token,
        }
    }

    pub fn spawn_pusher_task<D: LineSink>(&mut self, pusher: Pusher<D>) {
        let token = self.cancellation_token.clone();
        self.tasks.push(tokio::spawn(async move {
            tracing::info!("Starting pusher task");
            pusher.run(token).await;
            tracing::info!("Pusher task completed");
        }));
    }

    pub fn spawn_activation_server_task(&mut self, server: ActivationServer) {
        let token = self.cancellation_token.clone();
        self.tasks.push(tokio::spawn(async move {
            tracing::info!(
                "Starting activation server on {}",
                server.socket_path().display()
            );
            if let Err(e) = server.run(token).await {
                tracing::error!("Activation server failed: {e:?}");
            } else {
                tracing::info!("Activation server completed");
            }
        }));
    }

    /// wait for tasks to complete or receive shutdown signal
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        use tokio::signal::unix::signal;
        use tokio::signal::unix::SignalKind;

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let signal_handler = tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        });

        let (finished, failure) = tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                (None, None)
            }
            (result, index, _remaining) = futures::future::select_all(&mut self.tasks) => {
                match result {
                    Ok(()) => {
                        tracing::warn!("Task completed unexpectedly");
                        (Some(index), None)
                    }
                    Err(e) => {
                        tracing::error!("Task completed with error: {e}");
                        (Some(index), Some(e))
                    }
                }
            }
        };

        if let Some(index) = finished {
            self.tasks.remove(index);
        }
        self.shutdown().await;
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    async fn shutdown(&mut self) {
        self.cancellation_token.cancel();
        self.wait_for_tasks_with_timeout(Duration::from_secs(30)).await;
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                if let Err(e) = task.await {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }
}
