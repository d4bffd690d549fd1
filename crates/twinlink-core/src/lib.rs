//! Core of the twinlink gateway.
//!
//! twinlink polls industrial data points on a per-point schedule and forwards
//! the observed values to an Eclipse Ditto digital twin.
//!
//! ## Architecture
//!
//! - **mapping**: turns a mapping document into [`PropertySpec`] records
//! - **source**: the [`SourceReader`] seam implemented by protocol drivers
//! - **publish**: the [`PropertyPublisher`] seam implemented by twin clients
//! - **supervisor**: one fixed-rate poll task per property on a bounded worker pool
//!
//! Protocol drivers live in `twinlink-devices`, the Ditto client in
//! `twinlink-ditto`.

pub mod config;
pub mod error;
pub mod mapping;
pub mod model;
pub mod publish;
pub mod source;
pub mod supervisor;

pub use error::{MappingError, PublishError, ReadError};
pub use mapping::{resolve_properties, ConfigurationProperty, ModelCoordinates};
pub use model::{PropertyPath, PropertySpec, PropertyValue, TwinIdentity, ValueType};
pub use publish::{PublishCompleter, PublishHandle, PublishOutcome, PropertyPublisher};
pub use source::{ReadResult, SourceReader};
pub use supervisor::{PollHandle, PollSupervisor, StatsSnapshot, TaskStats};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
