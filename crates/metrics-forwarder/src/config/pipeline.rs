use std::path::PathBuf;
use std::time::Duration;

use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::info;
use tracing::warn;
use url::Url;

use super::daemon::PipelineArgs;
use crate::delivery::ContentMode;
use crate::delivery::DeliverySettings;
use crate::delivery::SourceIdentity;
use crate::delivery::DEFAULT_DELIVERY_TIMEOUT;
use crate::metrics::encoders::EncodingRules;
use crate::metrics::encoders::PatternList;
use crate::metrics::poller::DEFAULT_POLL_INTERVAL;

#[derive(Debug, Display)]
pub enum ConfigError {
    #[display("invalid ingestion URL `{url}`")]
    InvalidUrl { url: String },
    #[display("invalid regular expression in {setting}")]
    InvalidPattern { setting: &'static str },
}

impl core::error::Error for ConfigError {}

/// Fully resolved, immutable settings of one pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub delivery: DeliverySettings,
    pub rules: EncodingRules,
    pub poll_interval: Duration,
    pub metrics_socket: PathBuf,
    pub queue_capacity: usize,
}

impl PipelineConfig {
    pub fn from_args(args: &PipelineArgs) -> Result<Self, Report<ConfigError>> {
        let url = parse_endpoint(&args.sumo_url)?;

        let rules = EncodingRules {
            metrics_included: compile_patterns("metrics_included", args.metrics_included.as_deref())?,
            metrics_excluded: compile_patterns("metrics_excluded", args.metrics_excluded.as_deref())?,
            intrinsic_labels: compile_patterns("intrinsic_labels", args.intrinsic_labels.as_deref())?,
            extra_intrinsic_tags: split_list(args.extra_intrinsic_tags.as_deref().unwrap_or_default()),
            extra_meta_tags: split_list(args.extra_meta_tags.as_deref().unwrap_or_default()),
        };
        for tag in rules.extra_intrinsic_tags.iter().chain(&rules.extra_meta_tags) {
            if !tag.contains('=') {
                warn!(tag = %tag, "Extra tag is not of the form key=value");
            }
        }

        let identity = SourceIdentity {
            category: args.source_category.clone(),
            name: args.source_name.clone(),
            host: args
                .source_host
                .clone()
                .filter(|host| !host.is_empty())
                .unwrap_or_else(default_hostname),
        };

        let delivery = DeliverySettings {
            url,
            content_mode: ContentMode::from_as_log(bool_setting("as_log", args.as_log.as_deref(), false)),
            compress: bool_setting("compress", args.compress.as_deref(), true),
            identity,
            root_ca_pem: args.root_ca_path.as_ref().and_then(|path| {
                std::fs::read(path)
                    .inspect_err(|e| {
                        warn!(path = %path.display(), "Cannot read root CA bundle, using default roots: {e}")
                    })
                    .ok()
            }),
            proxy_url: parse_proxy(args.proxy_url.as_deref()),
            timeout: DEFAULT_DELIVERY_TIMEOUT,
        };

        Ok(Self {
            delivery,
            rules,
            poll_interval: parse_poll_interval(args.poll_interval.as_deref()),
            metrics_socket: args.metrics_socket.clone(),
            queue_capacity: args.queue_capacity.max(1),
        })
    }

    pub fn log_summary(&self) {
        let delivery = &self.delivery;
        info!(
            url = %delivery.url,
            content_type = delivery.content_mode.content_type(),
            compress = delivery.compress,
            source_category = %delivery.identity.category,
            source_name = %delivery.identity.name,
            source_host = %delivery.identity.host,
            proxy = ?delivery.proxy_url.as_ref().map(Url::as_str),
            custom_root_ca = delivery.root_ca_pem.is_some(),
            "Delivery settings"
        );
        info!(
            poll_interval = ?self.poll_interval,
            metrics_socket = %self.metrics_socket.display(),
            queue_capacity = self.queue_capacity,
            metrics_included = ?self.rules.metrics_included.patterns(),
            metrics_excluded = ?self.rules.metrics_excluded.patterns(),
            intrinsic_labels = ?self.rules.intrinsic_labels.patterns(),
            extra_intrinsic_tags = ?self.rules.extra_intrinsic_tags,
            extra_meta_tags = ?self.rules.extra_meta_tags,
            "Pipeline settings"
        );
    }
}

/// Absolute http(s) URL with a host.
fn parse_endpoint(raw: &str) -> Result<Url, Report<ConfigError>> {
    let invalid = || ConfigError::InvalidUrl {
        url: raw.to_string(),
    };
    let url = Url::parse(raw.trim()).change_context_lazy(invalid)?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Report::new(invalid()).attach_printable("scheme must be http or https"));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(Report::new(invalid()).attach_printable("URL has no host"));
    }
    Ok(url)
}

fn compile_patterns(
    setting: &'static str,
    raw: Option<&str>,
) -> Result<PatternList, Report<ConfigError>> {
    let patterns = split_list(raw.unwrap_or_default());
    PatternList::new(&patterns)
        .change_context(ConfigError::InvalidPattern { setting })
        .attach_printable_lazy(|| format!("patterns: {patterns:?}"))
}

/// Split on commas, dropping empty fields.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Accepts the usual spellings: 1, t, T, TRUE, true, True and their false
/// counterparts.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn bool_setting(setting: &str, raw: Option<&str>, default: bool) -> bool {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => default,
        Some(raw) => parse_bool(raw).unwrap_or_else(|| {
            warn!(setting, value = raw, default, "Invalid boolean, using default");
            default
        }),
    }
}

/// Missing, unparsable or zero durations fall back to the default interval.
pub fn parse_poll_interval(raw: Option<&str>) -> Duration {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return DEFAULT_POLL_INTERVAL;
    };
    match humantime::parse_duration(raw) {
        Ok(interval) if !interval.is_zero() => interval,
        Ok(_) => {
            warn!(value = raw, default = ?DEFAULT_POLL_INTERVAL, "Poll interval is zero, using default");
            DEFAULT_POLL_INTERVAL
        }
        Err(e) => {
            warn!(value = raw, default = ?DEFAULT_POLL_INTERVAL, "Invalid poll interval, using default: {e}");
            DEFAULT_POLL_INTERVAL
        }
    }
}

fn parse_proxy(raw: Option<&str>) -> Option<Url> {
    let raw = raw.map(str::trim).filter(|raw| !raw.is_empty())?;
    Url::parse(raw)
        .inspect_err(|e| warn!(proxy = raw, "Invalid proxy URL, delivering without proxy: {e}"))
        .ok()
}

fn default_hostname() -> String {
    os_hostname().unwrap_or_else(|| "localhost".to_string())
}

fn os_hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for `buf.len()` bytes for the whole call.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return None;
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).trim().to_string();
    (!name.is_empty()).then_some(name)
}
