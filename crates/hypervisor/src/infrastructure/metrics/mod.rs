//! Telemetry sink
//!
//! Periodically encodes ledger usage, VM state counts and dispatch activity of
//! every chassis and emits each line on the `metrics` tracing target, which the
//! logging setup routes to its own file.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::domain::Hypervisor;

pub mod encoders;
use encoders::{
    create_encoder, ChassisUsageParams, DispatchParams, Encoder, MetricsEncoder as _,
    MetricsFormat, Tags,
};

/// Encoded line bytes printable as text
pub struct BytesWrapper(Vec<u8>);

impl fmt::Display for BytesWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => f.write_str(s),
            Err(_) => {
                tracing::error!(msg = "Encoded metrics line is not valid UTF-8");
                Err(fmt::Error)
            }
        }
    }
}

impl From<Vec<u8>> for BytesWrapper {
    fn from(bytes: Vec<u8>) -> Self {
        BytesWrapper(bytes)
    }
}

/// Parses `--metrics-extra-labels`, a JSON object of static tags.
pub fn parse_extra_labels(raw: Option<&str>) -> Tags {
    match raw {
        None | Some("null") | Some("") => Tags::new(),
        Some(json) => serde_json::from_str(json).unwrap_or_else(|e| {
            tracing::warn!(
                "Failed to parse metrics_extra_labels JSON: {}, using empty map",
                e
            );
            Tags::new()
        }),
    }
}

/// Encodes one collection pass over every chassis.
pub async fn collect_metrics(
    hypervisor: &Hypervisor,
    encoder: &Encoder,
    node_name: &str,
    extra_labels: &Tags,
    timestamp: i64,
) -> Vec<String> {
    let mut lines = Vec::new();

    for chassis in hypervisor.list_chassis() {
        let Ok(resources) = hypervisor.system_resources(&chassis).await else {
            continue;
        };
        for (kind, usage) in &resources.resources {
            lines.push(encoder.encode_chassis_usage(&ChassisUsageParams {
                chassis: &chassis,
                kind,
                node_name,
                allocated: usage.allocated,
                capacity: usage.capacity,
                timestamp,
                extra_labels,
            }));
        }
        for (state, count) in &resources.vm_counts {
            lines.push(encoder.encode_state_count(
                &chassis,
                node_name,
                state.as_str(),
                *count as u64,
                timestamp,
                extra_labels,
            ));
        }

        if let Ok(round) = hypervisor.active_set(&chassis).await {
            lines.push(encoder.encode_dispatch(&DispatchParams {
                chassis: &chassis,
                node_name,
                tick: round.tick,
                active: round.active.len() as u64,
                runnable: round.runnable as u64,
                timestamp,
                extra_labels,
            }));
        }
    }
    lines
}

/// Runs metrics collection every `interval` until cancelled.
pub(crate) async fn run_metrics(
    hypervisor: Arc<Hypervisor>,
    interval: Duration,
    node_name: &str,
    metrics_format: MetricsFormat,
    metrics_extra_labels: Option<&str>,
    cancellation_token: CancellationToken,
) {
    let encoder = create_encoder(metrics_format);
    let extra_labels = parse_extra_labels(metrics_extra_labels);
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                tracing::info!("Metrics collection shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                let lines = collect_metrics(
                    &hypervisor,
                    &encoder,
                    node_name,
                    &extra_labels,
                    current_time(),
                )
                .await;
                for line in lines {
                    tracing::info!(target: "metrics", msg = %line);
                }
            }
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn current_time() -> i64 {
    Utc::now().timestamp_millis()
}
