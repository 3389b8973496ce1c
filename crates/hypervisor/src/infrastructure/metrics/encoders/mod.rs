//! Metric line encoders
//!
//! Tags and fields are kept in sorted maps so that encoded lines are stable
//! across runs.

use std::collections::BTreeMap;

use clap::ValueEnum;
use derive_more::Display;
use serde::{Deserialize, Serialize};

pub mod influx;
pub mod json;

pub type Tags = BTreeMap<String, String>;
pub type Fields = BTreeMap<String, FieldValue>;

/// Output format of the telemetry sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsFormat {
    /// InfluxDB line protocol
    #[default]
    #[display("influx")]
    Influx,
    #[display("json")]
    Json,
}

/// Ledger usage of one resource kind on one chassis
#[derive(Debug, Clone)]
pub struct ChassisUsageParams<'a> {
    pub chassis: &'a str,
    pub kind: &'a str,
    pub node_name: &'a str,
    pub allocated: f64,
    pub capacity: f64,
    pub timestamp: i64,
    pub extra_labels: &'a Tags,
}

/// Dispatch activity of one chassis
#[derive(Debug, Clone)]
pub struct DispatchParams<'a> {
    pub chassis: &'a str,
    pub node_name: &'a str,
    pub tick: u64,
    pub active: u64,
    pub runnable: u64,
    pub timestamp: i64,
    pub extra_labels: &'a Tags,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    UnsignedInteger(u64),
    Float(f64),
    Boolean(bool),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::UnsignedInteger(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

fn base_tags(chassis: &str, node_name: &str, extra_labels: &Tags) -> Tags {
    let mut tags = extra_labels.clone();
    tags.insert("chassis".to_string(), chassis.to_string());
    tags.insert("node".to_string(), node_name.to_string());
    tags
}

/// Trait for encoding metrics in different formats
pub trait MetricsEncoder: Send + Sync {
    /// Encodes one measurement; `timestamp` is in milliseconds.
    fn encode_metrics(&self, measurement: &str, tags: &Tags, fields: &Fields, timestamp: i64)
        -> String;

    fn encode_chassis_usage(&self, params: &ChassisUsageParams) -> String {
        let mut tags = base_tags(params.chassis, params.node_name, params.extra_labels);
        tags.insert("kind".to_string(), params.kind.to_string());

        let utilization = if params.capacity > 0.0 {
            params.allocated / params.capacity * 100.0
        } else {
            0.0
        };
        let fields = Fields::from([
            ("allocated".to_string(), params.allocated.into()),
            ("capacity".to_string(), params.capacity.into()),
            ("utilization".to_string(), utilization.into()),
        ]);
        self.encode_metrics("vm_chassis_usage", &tags, &fields, params.timestamp)
    }

    #[allow(clippy::too_many_arguments)]
    fn encode_state_count(
        &self,
        chassis: &str,
        node_name: &str,
        state: &str,
        count: u64,
        timestamp: i64,
        extra_labels: &Tags,
    ) -> String {
        let mut tags = base_tags(chassis, node_name, extra_labels);
        tags.insert("state".to_string(), state.to_string());
        let fields = Fields::from([("count".to_string(), count.into())]);
        self.encode_metrics("vm_state_count", &tags, &fields, timestamp)
    }

    fn encode_dispatch(&self, params: &DispatchParams) -> String {
        let tags = base_tags(params.chassis, params.node_name, params.extra_labels);
        let fields = Fields::from([
            ("tick".to_string(), params.tick.into()),
            ("active".to_string(), params.active.into()),
            ("runnable".to_string(), params.runnable.into()),
        ]);
        self.encode_metrics("vm_dispatch", &tags, &fields, params.timestamp)
    }
}

/// Concrete encoder without dynamic dispatch
#[derive(Debug, Clone, Copy)]
pub enum Encoder {
    Json(json::JsonEncoder),
    Influx(influx::InfluxEncoder),
}

impl MetricsEncoder for Encoder {
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &Tags,
        fields: &Fields,
        timestamp: i64,
    ) -> String {
        match self {
            Encoder::Json(inner) => inner.encode_metrics(measurement, tags, fields, timestamp),
            Encoder::Influx(inner) => inner.encode_metrics(measurement, tags, fields, timestamp),
        }
    }
}

pub fn create_encoder(format: MetricsFormat) -> Encoder {
    match format {
        MetricsFormat::Json => Encoder::Json(json::JsonEncoder::new()),
        MetricsFormat::Influx => Encoder::Influx(influx::InfluxEncoder::new()),
    }
}
