//! Driver dispatch: maps a decoded telegram to a small set of named,
//! human-meaningful fields via a driver implementation (§4.6).

pub mod auto;
pub mod multical21;

use crate::record::DataRecord;
use crate::types::DeviceType;
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// A driver turns a telegram's raw records into a map of named fields.
/// Implementations are expected to be cheap, stateless, and pure.
pub trait Driver: Send + Sync {
    /// Stable, lowercase identifier (e.g. `"multical21"`).
    fn name(&self) -> &'static str;

    /// Whether this driver claims telegrams from `manufacturer` /
    /// `device_type`. The registry tries drivers in registration order
    /// and stops at the first match (§4.6).
    fn can_handle(&self, manufacturer: &str, device_type: &DeviceType) -> bool;

    /// Turn parsed records into a named-field map.
    fn process(&self, records: &[DataRecord]) -> HashMap<String, JsonValue>;
}

/// Ordered collection of drivers, searched linearly; first match wins.
pub struct DriverRegistry {
    drivers: Vec<Box<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self { drivers: Vec::new() }
    }

    /// Build the default registry: concrete drivers first, the generic
    /// passthrough driver last so it never shadows a specific one.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(multical21::Multical21Driver::new()));
        registry.register(Box::new(auto::AutoDriver::new()));
        registry
    }

    pub fn register(&mut self, driver: Box<dyn Driver>) {
        self.drivers.push(driver);
    }

    /// First driver (in registration order) willing to handle this
    /// manufacturer/device-type combination.
    pub fn find(&self, manufacturer: &str, device_type: &DeviceType) -> Option<&dyn Driver> {
        self.drivers
            .iter()
            .find(|d| d.can_handle(manufacturer, device_type))
            .map(|d| d.as_ref())
    }

    pub fn by_name(&self, name: &str) -> Option<&dyn Driver> {
        self.drivers.iter().find(|d| d.name() == name).map(|d| d.as_ref())
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Two-level suggestion table: manufacturer+device_type first, falling
/// back to manufacturer alone, then to a device-type-only generic
/// suggestion, and finally to `"auto"` (§4.6).
pub fn suggest_driver(manufacturer: &str, device_type: &DeviceType) -> &'static str {
    match (manufacturer, device_type) {
        ("KAM", DeviceType::Water) | ("KAM", DeviceType::ColdWater) | ("KAM", DeviceType::WarmWater) => "multical21",
        ("KAM", _) => "auto",
        _ => "auto",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_prefers_specific_driver_over_auto() {
        let registry = DriverRegistry::with_defaults();
        let found = registry.find("KAM", &DeviceType::Water).unwrap();
        assert_eq!(found.name(), "multical21");
    }

    #[test]
    fn registry_falls_back_to_auto() {
        let registry = DriverRegistry::with_defaults();
        let found = registry.find("XYZ", &DeviceType::Gas).unwrap();
        assert_eq!(found.name(), "auto");
    }

    #[test]
    fn suggestion_table_prefers_manufacturer_and_type() {
        assert_eq!(suggest_driver("KAM", &DeviceType::Water), "multical21");
        assert_eq!(suggest_driver("ACME", &DeviceType::Gas), "auto");
    }
}
