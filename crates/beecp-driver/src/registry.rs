//! Process-scoped driver registry.

use std::fmt;
use std::sync::Arc;

use crate::driver::Driver;
use crate::error::{DriverError, Result};

/// Maps driver names to driver implementations.
///
/// Built once at startup and handed to each pool by reference; there is no
/// global mutable registration.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: Vec<(String, Arc<dyn Driver>)>,
}

impl DriverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under `name`, replacing any previous registration.
    pub fn register(&mut self, name: impl Into<String>, driver: Arc<dyn Driver>) -> &mut Self {
        let name = name.into();
        tracing::debug!(driver = %name, "registering driver");
        self.drivers.retain(|(existing, _)| *existing != name);
        self.drivers.push((name, driver));
        self
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with_driver(mut self, name: impl Into<String>, driver: Arc<dyn Driver>) -> Self {
        self.register(name, driver);
        self
    }

    /// Find the driver for a connection.
    ///
    /// A driver that accepts `url` wins; otherwise the driver registered as
    /// `name` is used.
    pub fn resolve(&self, name: &str, url: &str) -> Result<Arc<dyn Driver>> {
        if let Some((_, driver)) = self.drivers.iter().find(|(_, d)| d.accepts_url(url)) {
            return Ok(Arc::clone(driver));
        }
        self.drivers
            .iter()
            .find(|(registered, _)| registered == name)
            .map(|(_, driver)| Arc::clone(driver))
            .ok_or_else(|| DriverError::NoSuitableDriver {
                name: name.to_string(),
                url: url.to_string(),
            })
    }

    /// Number of registered drivers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Whether no drivers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field(
                "drivers",
                &self.drivers.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
