//! Global tracing subscriber with a separate metrics sink

use std::env;
use std::fmt;
use std::path::Path;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{self, FilterExt};
use tracing_subscriber::fmt::{format, layer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;
use utils::logging::LOG_PATH_ENV_VAR;

const METRICS_TARGET: &str = "metrics";

/// Writes only the field values of an event, i.e. the pre-encoded metric line.
struct MetricLineFormatter;

#[derive(Default)]
struct LineVisitor {
    line: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, _: &Field, value: &str) {
        self.line.push_str(value);
    }

    fn record_debug(&mut self, _: &Field, value: &dyn fmt::Debug) {
        self.line.push_str(&format!("{value:?}"));
    }
}

impl<S, N> FormatEvent<S, N> for MetricLineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        write!(writer, "{}", visitor.line)
    }
}

fn is_metrics(target: &str) -> bool {
    target == METRICS_TARGET
}

fn metrics_appender(metrics_file: &Path) -> Result<RollingFileAppender, String> {
    let dir = metrics_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let prefix = metrics_file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| format!("invalid metrics file name: {}", metrics_file.display()))?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(3)
        .build(dir)
        .map_err(|e| e.to_string())
}

/// Layer writing each `metrics` event as a bare line into a rolling `metrics_file`.
///
/// The guard flushes buffered lines when dropped.
fn metrics_layer<S>(
    metrics_file: &Path,
) -> Result<(Box<dyn Layer<S> + Send + Sync + 'static>, WorkerGuard), String>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let (file_writer, file_guard) = tracing_appender::non_blocking(metrics_appender(metrics_file)?);
    let layer = layer()
        .event_format(MetricLineFormatter)
        .fmt_fields(format::DefaultFields::new())
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|metadata| is_metrics(metadata.target())))
        .boxed();
    Ok((layer, file_guard))
}

/// Initializes the global tracing subscriber.
///
/// Events on the `metrics` target go to a rolling `metrics_file` when one is
/// given and are dropped otherwise. The returned guard must be held until exit
/// so buffered metric lines are flushed.
pub fn init(metrics_file: Option<&Path>) -> Option<WorkerGuard> {
    let log_path = env::var(LOG_PATH_ENV_VAR).ok();
    let fmt_layer = utils::logging::get_fmt_layer(log_path).with_filter(
        utils::logging::env_filter().and(filter::filter_fn(|metadata| {
            !is_metrics(metadata.target())
        })),
    );

    let (metrics, file_guard) = match metrics_file.map(metrics_layer) {
        Some(Ok((layer, guard))) => (Some(layer), Some(guard)),
        Some(Err(e)) => {
            eprintln!("failed to open metrics file: {e}, metrics lines will be dropped");
            (None, None)
        }
        None => (None, None),
    };

    registry().with(fmt_layer).with(metrics).init();
    file_guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_target_is_exact() {
        assert!(is_metrics("metrics"));
        assert!(!is_metrics("hypervisor::infrastructure::metrics"));
    }

    #[test]
    fn test_metrics_appender_uses_file_parent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(metrics_appender(&dir.path().join("vm-metrics.log")).is_ok());
    }

    #[test]
    fn test_metrics_events_land_in_metrics_file_only() {
        let dir = tempfile::tempdir().unwrap();
        let (layer, guard) = metrics_layer(&dir.path().join("vm-metrics.log")).unwrap();
        let subscriber = registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "metrics", msg = "vm_dispatch,chassis=small active=1u 1\n");
            tracing::info!("Chassis registered");
        });
        drop(guard);

        let contents: String = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| std::fs::read_to_string(entry.unwrap().path()).unwrap())
            .collect();
        assert_eq!(contents, "vm_dispatch,chassis=small active=1u 1\n");
    }
}
