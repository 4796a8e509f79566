pub mod encoders;
pub mod exposition;
pub mod family;
pub mod poller;
pub mod pusher;
pub mod queue;
pub mod source;

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use error_stack::Report;
use tracing::warn;

use encoders::encode_family;
use encoders::EncodingRules;
use encoders::WireLine;
use source::SourceError;

pub use family::MetricFamily;
pub use poller::Poller;
pub use pusher::Pusher;
pub use source::MetricsSource;
pub use source::SnapshotSource;

/// Milliseconds since the Unix epoch.
pub fn current_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Poll `source` once and encode every family of the snapshot.
pub async fn collect_once<S: SnapshotSource>(
    source: &S,
    rules: &EncodingRules,
) -> Result<Vec<WireLine>, Report<SourceError>> {
    let families = source.fetch().await?;
    let mut lines = Vec::new();
    for family in &families {
        let encoded = encode_family(rules, family, current_time());
        for report in &encoded.rejected {
            warn!("Dropping sample: {report:?}");
        }
        lines.extend(encoded.lines);
    }
    Ok(lines)
}
