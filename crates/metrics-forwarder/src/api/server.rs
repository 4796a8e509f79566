use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use error_stack::ResultExt;
use poem::listener::Acceptor;
use poem::listener::Listener;
use poem::listener::UnixAcceptor;
use poem::listener::UnixListener;
use poem::middleware::Tracing;
use poem::post;
use poem::Endpoint;
use poem::EndpointExt;
use poem::Route;
use poem::Server;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use super::errors::ActivationError;
use super::handlers::activate;
use super::handlers::start_metrics;
use super::handlers::stop_metrics;
use crate::app::CollectionControl;

pub const DEFAULT_PLUGIN_SOCKET: &str = "/run/docker/plugins/metrics.sock";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Routes of the plugin activation protocol.
pub fn routes(control: Arc<CollectionControl>) -> impl Endpoint {
    Route::new()
        .at("/Plugin.Activate", post(activate))
        .at("/MetricsCollector.StartMetrics", post(start_metrics))
        .at("/MetricsCollector.StopMetrics", post(stop_metrics))
        .data(control)
        .with(Tracing)
}

/// Activation API listening on a Unix socket.
pub struct ActivationServer {
    socket_path: PathBuf,
    acceptor: UnixAcceptor,
    control: Arc<CollectionControl>,
}

impl ActivationServer {
    /// Bind the socket, replacing a stale one left by a previous run.
    pub async fn bind(
        socket_path: impl Into<PathBuf>,
        control: Arc<CollectionControl>,
    ) -> Result<Self, Report<ActivationError>> {
        let socket_path = socket_path.into();
        let path = socket_path.display().to_string();
        prepare_socket_path(&socket_path)
            .change_context_lazy(|| ActivationError::Socket { path: path.clone() })?;

        let acceptor = UnixListener::bind(socket_path.clone())
            .into_acceptor()
            .await
            .change_context(ActivationError::Bind { path })?;
        info!(socket = %socket_path.display(), "Activation server bound");

        Ok(Self {
            socket_path,
            acceptor,
            control,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serve until `token` is cancelled, then remove the socket.
    pub async fn run(self, token: CancellationToken) -> Result<(), Report<ActivationError>> {
        let local = self
            .acceptor
            .local_addr()
            .into_iter()
            .next()
            .map(|addr| addr.to_string());
        info!(addr = ?local, "Starting activation server");

        let app = routes(self.control);
        let result = Server::new_with_acceptor(self.acceptor)
            .run_with_graceful_shutdown(app, token.cancelled_owned(), Some(SHUTDOWN_GRACE))
            .await;

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            warn!(socket = %self.socket_path.display(), "Cannot remove plugin socket: {e}");
        }
        result.change_context(ActivationError::Serve)?;
        info!("Activation server stopped");
        Ok(())
    }
}

fn prepare_socket_path(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(socket = %path.display(), "Removed stale plugin socket");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
