use influxdb_line_protocol::LineProtocolBuilder;

use super::{FieldValue, Fields, MetricsEncoder, Tags};
use crate::infrastructure::metrics::BytesWrapper;

/// InfluxDB line protocol encoder
#[derive(Debug, Clone, Copy, Default)]
pub struct InfluxEncoder;

impl InfluxEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl MetricsEncoder for InfluxEncoder {
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &Tags,
        fields: &Fields,
        timestamp: i64,
    ) -> String {
        let mut builder = LineProtocolBuilder::new().measurement(measurement);
        for (key, value) in tags {
            builder = builder.tag(key, value);
        }

        // The builder only reaches its field state through a first field.
        let mut entries = fields.iter();
        let Some((first_key, first_value)) = entries.next() else {
            let line = builder
                .field("_empty", true)
                .timestamp(timestamp)
                .close_line()
                .build();
            return BytesWrapper::from(line).to_string();
        };

        let mut line = match first_value {
            FieldValue::String(s) => builder.field(first_key, s.as_str()),
            FieldValue::Integer(i) => builder.field(first_key, *i),
            FieldValue::UnsignedInteger(u) => builder.field(first_key, *u),
            FieldValue::Float(f) => builder.field(first_key, *f),
            FieldValue::Boolean(b) => builder.field(first_key, *b),
        };
        for (key, value) in entries {
            line = match value {
                FieldValue::String(s) => line.field(key, s.as_str()),
                FieldValue::Integer(i) => line.field(key, *i),
                FieldValue::UnsignedInteger(u) => line.field(key, *u),
                FieldValue::Float(f) => line.field(key, *f),
                FieldValue::Boolean(b) => line.field(key, *b),
            };
        }

        BytesWrapper::from(line.timestamp(timestamp).close_line().build()).to_string()
    }
}
