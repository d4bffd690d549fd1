//! Error types.
//!
//! Startup failures ([`MappingError`]) are kept apart from the per-tick
//! failures ([`ReadError`], [`PublishError`]) that a poll task logs and skips.

use thiserror::Error;

/// Error resolving the mapping document. Always fatal at startup.
#[derive(Debug, Error)]
pub enum MappingError {
    /// The model is not present in the document
    #[error("Model {0} not found in mapping document")]
    MissingModel(String),

    /// The model has no configuration property list
    #[error("Model {0} declares no configurationProperties array")]
    MissingConfigurationProperties(String),

    /// A configuration property entry lacks `name` or `type`
    #[error("Malformed configuration property at index {index}: {reason}")]
    MalformedProperty { index: usize, reason: String },

    /// An attribute block exists but lacks a required attribute
    #[error("Mapping for property '{property}' is missing attribute '{attribute}'")]
    MissingAttribute { property: String, attribute: String },

    /// The rate is not an unsigned millisecond count
    #[error("Mapping for property '{property}' has invalid rate '{rate}'")]
    InvalidRate { property: String, rate: String },

    /// The declared type cannot be forwarded
    #[error("Type '{type_tag}' of property '{property}' is not supported")]
    UnsupportedType { property: String, type_tag: String },
}

/// Outcome of a failed protocol read. Recoverable: the tick is skipped.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReadError {
    /// Connection could not be established
    #[error("Connection error: {0}")]
    Connection(String),

    /// The read did not complete in time
    #[error("Read timeout after {0}ms")]
    Timeout(u64),

    /// The device answered with a non-OK status for the field
    #[error("Field status {0}")]
    FieldStatus(String),

    /// The field value does not fit the declared type
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Malformed or unexpected protocol traffic
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Failed property update. Only logged.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PublishError {
    /// The live channel is gone
    #[error("Connection closed")]
    ConnectionClosed,

    /// The message could not be written
    #[error("Send error: {0}")]
    Send(String),

    /// The destination rejected the update
    #[error("Rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// No response arrived in time
    #[error("No response after {0}ms")]
    Timeout(u64),

    /// The completion was dropped before an outcome was reported
    #[error("Publish abandoned before completion")]
    Abandoned,
}
