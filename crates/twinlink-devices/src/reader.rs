//! `SourceReader` backed by the protocol drivers.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, trace};
use twinlink_core::config::READ_TIMEOUT;
use twinlink_core::{PropertySpec, ReadError, ReadResult, SourceReader};

use crate::driver::{DriverManager, DriverResult};
use crate::endpoint::Endpoint;

/// Reads one field per call over a fresh connection.
///
/// Connecting and reading are each bounded by the read timeout. The
/// connection is closed after every read, whatever its outcome.
#[derive(Clone)]
pub struct ProtocolReader {
    drivers: DriverManager,
    timeout: Duration,
}

impl ProtocolReader {
    pub fn new(drivers: DriverManager) -> Self {
        Self::with_timeout(drivers, READ_TIMEOUT)
    }

    pub fn with_timeout(drivers: DriverManager, timeout: Duration) -> Self {
        Self { drivers, timeout }
    }

    /// Check that a property's URL has a driver and its address parses.
    pub fn validate(&self, spec: &PropertySpec) -> DriverResult<()> {
        let endpoint = Endpoint::parse(&spec.source_url)?;
        self.drivers
            .driver_for(&endpoint)?
            .validate_address(&spec.source_address)
    }

    fn timeout_error(&self) -> ReadError {
        ReadError::Timeout(self.timeout.as_millis() as u64)
    }
}

#[async_trait]
impl SourceReader for ProtocolReader {
    async fn read(&self, spec: &PropertySpec) -> ReadResult {
        let endpoint = Endpoint::parse(&spec.source_url)?;
        let driver = self.drivers.driver_for(&endpoint)?;

        let mut connection = timeout(self.timeout, driver.connect(&endpoint))
            .await
            .map_err(|_| self.timeout_error())??;
        trace!(property = %spec.name, %endpoint, "Connected");

        let response = timeout(self.timeout, connection.read(&spec.source_address)).await;
        connection.close().await;

        let response = response.map_err(|_| self.timeout_error())??;
        if !response.status.is_ok() {
            debug!(
                property = %spec.name,
                address = %spec.source_address,
                status = %response.status,
                "Field read returned non-OK status"
            );
            return Err(ReadError::FieldStatus(response.status.to_string()));
        }
        let value = response.value.ok_or_else(|| {
            ReadError::Protocol(format!("no value for {}", spec.source_address))
        })?;
        value.to_property(spec.value_type)
    }
}
