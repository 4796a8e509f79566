use std::path::PathBuf;

use clap::Args;

use crate::api::DEFAULT_PLUGIN_SOCKET;
use crate::metrics::queue::DEFAULT_QUEUE_CAPACITY;
use crate::metrics::source::DEFAULT_METRICS_SOCKET;

/// Settings shared by every command that runs the pipeline.
///
/// Booleans, durations and lists are taken as raw strings and resolved by
/// [`PipelineConfig::from_args`](super::PipelineConfig::from_args), which
/// falls back to defaults with a warning instead of refusing to start.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    #[arg(
        long,
        env = "SUMO_URL",
        help = "Ingestion endpoint the encoded lines are posted to"
    )]
    pub sumo_url: String,

    #[arg(
        long,
        env = "SUMO_POLL_INTERVAL",
        help = "Interval between two polls of the metrics source, e.g. 10s, 1m30s, 500ms"
    )]
    pub poll_interval: Option<String>,

    #[arg(
        long,
        env = "SUMO_AS_LOG",
        help = "Send lines as plain text logs instead of carbon2 metrics (true/false)"
    )]
    pub as_log: Option<String>,

    #[arg(long, env = "SUMO_SOURCE_CATEGORY", default_value = "")]
    pub source_category: String,

    #[arg(long, env = "SUMO_SOURCE_NAME", default_value = "")]
    pub source_name: String,

    #[arg(
        long,
        env = "SUMO_SOURCE_HOST",
        help = "Source host header, defaults to the OS hostname"
    )]
    pub source_host: Option<String>,

    #[arg(
        long,
        env = "SUMO_METRICS_INCLUDED",
        help = "Comma separated regular expressions, only matching metric names are sent"
    )]
    pub metrics_included: Option<String>,

    #[arg(
        long,
        env = "SUMO_METRICS_EXCLUDED",
        help = "Comma separated regular expressions, matching metric names are never sent"
    )]
    pub metrics_excluded: Option<String>,

    #[arg(
        long,
        env = "SUMO_INTRINSIC_LABELS",
        help = "Comma separated regular expressions selecting labels sent as intrinsic tags"
    )]
    pub intrinsic_labels: Option<String>,

    #[arg(
        long,
        env = "SUMO_EXTRA_INTRINSIC_TAGS",
        help = "Comma separated k=v tags prepended to the intrinsic tags of every line"
    )]
    pub extra_intrinsic_tags: Option<String>,

    #[arg(
        long,
        env = "SUMO_EXTRA_META_TAGS",
        help = "Comma separated k=v tags prepended to the meta tags of every line"
    )]
    pub extra_meta_tags: Option<String>,

    #[arg(
        long,
        env = "SUMO_ROOT_CA_PATH",
        value_hint = clap::ValueHint::FilePath,
        help = "PEM bundle trusted in addition to the system roots"
    )]
    pub root_ca_path: Option<PathBuf>,

    #[arg(long, env = "SUMO_PROXY_URL", help = "Forward proxy for delivery requests")]
    pub proxy_url: Option<String>,

    #[arg(
        long,
        env = "SUMO_COMPRESS",
        help = "Gzip request bodies (true/false), enabled by default"
    )]
    pub compress: Option<String>,

    #[arg(
        long,
        env = "DOCKER_METRICS_SOCKET",
        value_hint = clap::ValueHint::FilePath,
        default_value = DEFAULT_METRICS_SOCKET
    )]
    pub metrics_socket: PathBuf,

    #[arg(
        long,
        env = "METRICS_QUEUE_CAPACITY",
        default_value_t = DEFAULT_QUEUE_CAPACITY,
        help = "Number of metric families buffered between poller and pusher"
    )]
    pub queue_capacity: usize,
}

#[derive(Args, Debug, Clone)]
pub struct DaemonArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,

    #[arg(
        long,
        env = "PLUGIN_SOCKET",
        value_hint = clap::ValueHint::FilePath,
        default_value = DEFAULT_PLUGIN_SOCKET,
        help = "Unix socket the plugin activation API listens on"
    )]
    pub plugin_socket: PathBuf,

    #[arg(
        long,
        env = "METRICS_LINES_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Also write every encoded line to this file, rotated daily, e.g. /logs/lines.log"
    )]
    pub lines_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct DryRunArgs {
    #[command(flatten)]
    pub pipeline: PipelineArgs,
}
