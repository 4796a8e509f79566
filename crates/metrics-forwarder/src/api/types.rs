use serde::Serialize;

pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1+json";
pub const METRICS_COLLECTOR: &str = "MetricsCollector";

/// Answer to `/Plugin.Activate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivateResponse {
    #[serde(rename = "Implements")]
    pub implements: Vec<String>,
}

impl ActivateResponse {
    pub fn metrics_collector() -> Self {
        Self {
            implements: vec![METRICS_COLLECTOR.to_string()],
        }
    }
}

/// Generic plugin answer, an empty `Err` means success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PluginResponse {
    #[serde(rename = "Err")]
    pub err: String,
}
