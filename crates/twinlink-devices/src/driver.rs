//! Driver interface and driver selection by URL scheme.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use twinlink_core::ReadError;

use crate::endpoint::Endpoint;
use crate::field::{FieldStatus, FieldValue};

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Error type for driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Source URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// No driver registered for the scheme
    #[error("Unsupported scheme '{scheme}'. Available drivers: {available}")]
    UnsupportedScheme { scheme: String, available: String },

    /// Field address could not be parsed by the driver
    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed or unexpected response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Socket I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DriverError> for ReadError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::InvalidUrl(_)
            | DriverError::UnsupportedScheme { .. }
            | DriverError::Connection(_)
            | DriverError::Io(_) => ReadError::Connection(e.to_string()),
            DriverError::InvalidAddress { .. } | DriverError::Protocol(_) => {
                ReadError::Protocol(e.to_string())
            }
        }
    }
}

/// Response to a single-field read.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldResponse {
    pub status: FieldStatus,
    /// Present when `status` is OK
    pub value: Option<FieldValue>,
}

impl FieldResponse {
    pub fn ok(value: FieldValue) -> Self {
        Self {
            status: FieldStatus::Ok,
            value: Some(value),
        }
    }

    pub fn failed(status: FieldStatus) -> Self {
        Self {
            status,
            value: None,
        }
    }
}

/// An open connection to a source device.
#[async_trait]
pub trait Connection: Send {
    /// Read a single field.
    async fn read(&mut self, address: &str) -> DriverResult<FieldResponse>;

    /// Release the connection.
    async fn close(&mut self);
}

/// A source protocol driver.
#[async_trait]
pub trait Driver: Send + Sync {
    /// URL scheme handled by this driver.
    fn scheme(&self) -> &'static str;

    /// Check an address without connecting.
    fn validate_address(&self, address: &str) -> DriverResult<()>;

    /// Open a connection to the endpoint.
    async fn connect(&self, endpoint: &Endpoint) -> DriverResult<Box<dyn Connection>>;
}

/// Drivers keyed by URL scheme.
#[derive(Clone, Default)]
pub struct DriverManager {
    drivers: HashMap<&'static str, Arc<dyn Driver>>,
}

impl DriverManager {
    /// An empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// A manager with every driver enabled at compile time.
    pub fn with_default_drivers() -> Self {
        #[allow(unused_mut)]
        let mut manager = Self::new();

        #[cfg(feature = "s7")]
        manager.register(Arc::new(crate::drivers::s7::S7Driver::new()));

        #[cfg(feature = "modbus")]
        manager.register(Arc::new(crate::drivers::modbus::ModbusDriver::new()));

        #[cfg(feature = "simulated")]
        manager.register(Arc::new(crate::drivers::simulated::SimulatedDriver::new()));

        manager
    }

    /// Register a driver, replacing any driver for the same scheme.
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.insert(driver.scheme(), driver);
    }

    /// Registered schemes, sorted.
    pub fn schemes(&self) -> Vec<&'static str> {
        let mut schemes: Vec<_> = self.drivers.keys().copied().collect();
        schemes.sort_unstable();
        schemes
    }

    /// Driver for an endpoint's scheme.
    pub fn driver_for(&self, endpoint: &Endpoint) -> DriverResult<Arc<dyn Driver>> {
        self.drivers
            .get(endpoint.scheme.as_str())
            .cloned()
            .ok_or_else(|| DriverError::UnsupportedScheme {
                scheme: endpoint.scheme.clone(),
                available: self.schemes().join(", "),
            })
    }

    /// Open a connection to `endpoint` with the matching driver.
    pub async fn connect(&self, endpoint: &Endpoint) -> DriverResult<Box<dyn Connection>> {
        self.driver_for(endpoint)?.connect(endpoint).await
    }
}

/// Schemes of the drivers enabled at compile time.
pub fn available_drivers() -> Vec<&'static str> {
    DriverManager::with_default_drivers().schemes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_drivers() {
        let drivers = available_drivers();
        assert!(drivers.contains(&"s7"));
        assert!(drivers.contains(&"modbus"));
        assert!(drivers.contains(&"simulated"));
    }

    #[tokio::test]
    async fn test_unknown_scheme() {
        let manager = DriverManager::with_default_drivers();
        let endpoint = Endpoint::parse("opcua://10.0.0.1:4840").unwrap();
        let err = manager.connect(&endpoint).await.err().unwrap();
        assert!(matches!(err, DriverError::UnsupportedScheme { ref scheme, .. } if scheme == "opcua"));
        assert!(err.to_string().contains("s7"));
    }

    #[test]
    fn test_read_error_mapping() {
        let err: ReadError = DriverError::Connection("refused".to_string()).into();
        assert!(matches!(err, ReadError::Connection(_)));

        let err: ReadError = DriverError::Protocol("short frame".to_string()).into();
        assert!(matches!(err, ReadError::Protocol(_)));
    }
}
