use std::collections::HashMap;
use std::sync::Arc;

use crate::driver::ResourceDriver;
use crate::error::LookupError;

/// Dispatches lookups to the [`ResourceDriver`] registered for a resource type.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn ResourceDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under its own resource type. Returns `&mut self` for chaining.
    pub fn register(&mut self, driver: Arc<dyn ResourceDriver>) -> &mut Self {
        self.drivers.insert(driver.resource_type().to_string(), driver);
        self
    }

    pub fn for_type(&self, resource_type: &str) -> Result<Arc<dyn ResourceDriver>, LookupError> {
        self.drivers
            .get(resource_type)
            .cloned()
            .ok_or_else(|| LookupError::UnsupportedType(resource_type.to_string()))
    }

    /// All resource types that have a registered driver, sorted.
    pub fn resource_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.drivers.keys().cloned().collect();
        types.sort();
        types
    }
}
