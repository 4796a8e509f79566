use std::sync::Arc;

use poem::handler;
use poem::web::Data;
use poem::web::Json;
use poem::IntoResponse;

use super::types::ActivateResponse;
use super::types::PluginResponse;
use super::types::PLUGIN_CONTENT_TYPE;
use crate::app::CollectionControl;

/// Handshake: announce the metrics collector capability
#[handler]
pub async fn activate() -> impl IntoResponse {
    tracing::info!("Plugin activated");
    Json(ActivateResponse::metrics_collector()).with_content_type(PLUGIN_CONTENT_TYPE)
}

#[handler]
pub async fn start_metrics(control: Data<&Arc<CollectionControl>>) -> impl IntoResponse {
    let outcome = control.start().await;
    tracing::info!(?outcome, "Received StartMetrics");
    Json(PluginResponse::default()).with_content_type(PLUGIN_CONTENT_TYPE)
}

#[handler]
pub async fn stop_metrics(control: Data<&Arc<CollectionControl>>) -> impl IntoResponse {
    let outcome = control.stop().await;
    tracing::info!(?outcome, "Received StopMetrics");
    Json(PluginResponse::default()).with_content_type(PLUGIN_CONTENT_TYPE)
}
