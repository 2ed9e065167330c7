//! Generic passthrough driver: exposes every record keyed by its own
//! description, for meters with no dedicated driver (§4.6).

use super::Driver;
use crate::record::{DataRecord, Value};
use crate::types::DeviceType;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;

pub struct AutoDriver;

impl AutoDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for AutoDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for AutoDriver {
    fn name(&self) -> &'static str {
        "auto"
    }

    // Matches anything: last resort in the registry's linear search.
    fn can_handle(&self, _manufacturer: &str, _device_type: &DeviceType) -> bool {
        true
    }

    fn process(&self, records: &[DataRecord]) -> HashMap<String, JsonValue> {
        let mut fields = HashMap::new();
        for (index, record) in records.iter().enumerate() {
            let key = if record.unit.is_empty() {
                record.description.clone()
            } else {
                format!("{} ({})", record.description, record.unit)
            };
            let key = dedupe_key(&fields, key, index);
            let value = match &record.parsed {
                Value::I64(v) => json!(v),
                Value::F64(v) => json!(v),
                Value::Text(v) => json!(v),
                Value::Bytes(v) => json!(hex::encode(v)),
                Value::Date(d) | Value::DateTime(d) => json!(d.to_iso8601()),
                Value::Null => JsonValue::Null,
            };
            fields.insert(key, value);
        }
        fields
    }
}

fn dedupe_key(existing: &HashMap<String, JsonValue>, key: String, index: usize) -> String {
    if existing.contains_key(&key) {
        format!("{key} #{index}")
    } else {
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordFunction;

    fn record(description: &str, unit: &str, value: i64) -> DataRecord {
        DataRecord {
            dif_type: 0,
            vif_base: 0,
            storage: 0,
            tariff: 0,
            subunit: 0,
            function: RecordFunction::Instantaneous,
            raw_value: vec![],
            parsed: Value::I64(value),
            unit: unit.to_string(),
            description: description.to_string(),
            dife_chain: vec![],
            vife_chain: vec![],
        }
    }

    #[test]
    fn exposes_every_record_by_description_and_unit() {
        let driver = AutoDriver::new();
        let records = vec![record("Volume", "m³", 2)];
        let fields = driver.process(&records);
        assert_eq!(fields.get("Volume (m³)").unwrap(), &json!(2));
    }

    #[test]
    fn can_handle_anything() {
        let driver = AutoDriver::new();
        assert!(driver.can_handle("ANY", &DeviceType::Unknown(0xEE)));
    }
}
