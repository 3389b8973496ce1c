use serde_json::{json, Map, Number, Value};

use super::{FieldValue, Fields, MetricsEncoder, Tags};

/// One JSON object per line
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl JsonEncoder {
    pub fn new() -> Self {
        Self
    }
}

fn to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::String(s) => Value::String(s.clone()),
        FieldValue::Integer(i) => Value::Number(Number::from(*i)),
        FieldValue::UnsignedInteger(u) => Value::Number(Number::from(*u)),
        // NaN and infinities have no JSON form
        FieldValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        FieldValue::Boolean(b) => Value::Bool(*b),
    }
}

impl MetricsEncoder for JsonEncoder {
    fn encode_metrics(
        &self,
        measurement: &str,
        tags: &Tags,
        fields: &Fields,
        timestamp: i64,
    ) -> String {
        let fields: Map<String, Value> = fields
            .iter()
            .map(|(key, value)| (key.clone(), to_json(value)))
            .collect();

        let metrics = json!({
            "measure": measurement,
            "ts": timestamp,
            "tag": tags,
            "field": fields,
        });
        metrics.to_string() + "\n"
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_encode_state_count() {
        let tags = Tags::from([
            ("chassis".to_string(), "small".to_string()),
            ("state".to_string(), "PAUSED".to_string()),
        ]);
        let fields = Fields::from([("count".to_string(), 2u64.into())]);

        let line = JsonEncoder::new().encode_metrics("vm_state_count", &tags, &fields, 99);
        assert!(line.ends_with('\n'));

        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(
            value,
            json!({
                "measure": "vm_state_count",
                "ts": 99,
                "tag": { "chassis": "small", "state": "PAUSED" },
                "field": { "count": 2 },
            })
        );
    }

    #[test]
    fn test_non_finite_float_becomes_null() {
        let fields = Fields::from([
            ("utilization".to_string(), f64::NAN.into()),
            ("healthy".to_string(), true.into()),
            ("note".to_string(), "ok".into()),
        ]);
        let line = JsonEncoder::new().encode_metrics("m", &Tags::new(), &fields, 0);
        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert!(value["field"]["utilization"].is_null());
        assert_eq!(value["field"]["healthy"], true);
        assert_eq!(value["field"]["note"], "ok");
    }
}
