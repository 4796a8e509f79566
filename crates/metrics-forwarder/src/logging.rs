//! provides logging helpers

use std::fmt::{self};
use std::path::Path;

use tracing::field::Field;
use tracing::field::Visit;
use tracing::Event;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::FilterExt;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::format;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::FormatEvent;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Target of the events carrying one encoded wire line each.
pub const LINES_TARGET: &str = "metrics.lines";
const DEFAULT_LINES_PREFIX: &str = "lines.log";

/// Writes the recorded field values verbatim, one event per line.
struct LineFormatter;

struct FieldVisitor {
    msg: String,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, _: &Field, value: &str) {
        self.msg.push_str(value);
    }

    fn record_debug(&mut self, _: &Field, value: &dyn fmt::Debug) {
        self.msg.push_str(&format!("{value:?}"));
    }
}

impl<S, N> FormatEvent<S, N> for LineFormatter
where
    S: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = FieldVisitor { msg: String::new() };
        event.record(&mut visitor);
        writeln!(writer, "{}", visitor.msg)
    }
}

/// Split a file path into the rotation directory and the file name prefix.
fn rotation_target(lines_file: &Path) -> (&Path, &str) {
    if lines_file.is_dir() {
        return (lines_file, DEFAULT_LINES_PREFIX);
    }
    let parent = lines_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = lines_file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_LINES_PREFIX);
    (parent, prefix)
}

/// initiate the global tracing subscriber
///
/// Diagnostics go to stderr. With `lines_file` set, every encoded line is
/// also written to a daily rotated file; keep the returned guard alive for
/// the lifetime of the process.
pub fn init(lines_file: Option<&Path>) -> Option<WorkerGuard> {
    let fmt_layer = utils::logging::get_fmt_layer().with_filter(
        utils::logging::default_env_filter().and(filter::filter_fn(|metadata| {
            metadata.target() != LINES_TARGET
        })),
    );

    let Some(lines_file) = lines_file else {
        registry().with(fmt_layer).init();
        return None;
    };

    let (rotation_dir, prefix) = rotation_target(lines_file);
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(3)
        .build(rotation_dir);
    let (file_writer, file_guard) = match appender {
        Ok(appender) => tracing_appender::non_blocking(appender),
        Err(err) => {
            eprintln!(
                "failed to create lines file appender at {}: {err}; falling back to stdout",
                rotation_dir.display()
            );
            tracing_appender::non_blocking(std::io::stdout())
        }
    };

    let lines_layer = layer()
        .event_format(LineFormatter)
        .fmt_fields(format::DefaultFields::new())
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|metadata| {
            metadata.target() == LINES_TARGET
        }));

    registry().with(fmt_layer).with(lines_layer).init();
    Some(file_guard)
}
