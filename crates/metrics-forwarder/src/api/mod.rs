//! Docker plugin activation API
//!
//! Served on a Unix socket, every endpoint takes a `POST` and answers with
//! `application/vnd.docker.plugins.v1+json`:
//!
//! - `/Plugin.Activate` - capability handshake
//! - `/MetricsCollector.StartMetrics` - start polling the metrics source
//! - `/MetricsCollector.StopMetrics` - stop polling

pub mod errors;
pub mod handlers;
pub mod server;
pub mod types;

pub use errors::ActivationError;
pub use server::routes;
pub use server::ActivationServer;
pub use server::DEFAULT_PLUGIN_SOCKET;
