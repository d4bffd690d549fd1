//! Source reader seam.

use async_trait::async_trait;

use crate::error::ReadError;
use crate::model::{PropertySpec, PropertyValue};

/// Outcome of one protocol read.
pub type ReadResult = Result<PropertyValue, ReadError>;

/// Reads the current value of a mapped property from its source.
///
/// Implementations own the whole connection lifecycle of a read: connect,
/// read one field within the read timeout, release the connection. Failures
/// are returned, never raised.
#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn read(&self, spec: &PropertySpec) -> ReadResult;
}
