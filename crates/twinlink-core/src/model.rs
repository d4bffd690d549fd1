//! Data model shared by the mapping resolver, drivers, and twin clients.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MappingError;

/// Declared type of a configuration property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValueType {
    Double,
    Boolean,
    Int,
}

impl ValueType {
    /// Parse a model type tag such as `"DOUBLE"`.
    ///
    /// Unknown tags are rejected with [`MappingError::UnsupportedType`] so a
    /// mapping the gateway cannot forward fails at startup.
    pub fn parse(property: &str, tag: &str) -> Result<Self, MappingError> {
        match tag.to_ascii_uppercase().as_str() {
            "DOUBLE" => Ok(Self::Double),
            "BOOLEAN" => Ok(Self::Boolean),
            "INT" => Ok(Self::Int),
            _ => Err(MappingError::UnsupportedType {
                property: property.to_string(),
                type_tag: tag.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Double => "DOUBLE",
            Self::Boolean => "BOOLEAN",
            Self::Int => "INT",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value ready to be forwarded, typed per the property's [`ValueType`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Double(f64),
    Boolean(bool),
    Int(i32),
}

impl PropertyValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Double(_) => ValueType::Double,
            Self::Boolean(_) => ValueType::Boolean,
            Self::Int(_) => ValueType::Int,
        }
    }

    /// JSON representation used on the wire.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Double(v) => serde_json::json!(v),
            Self::Boolean(v) => Value::Bool(*v),
            Self::Int(v) => serde_json::json!(v),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Double(v) => write!(f, "{v}"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
        }
    }
}

/// One mapped configuration property: what to read, where, and how often.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySpec {
    /// Property name in the model
    pub name: String,
    /// Declared value type
    pub value_type: ValueType,
    /// Protocol address of the field, e.g. `%DB1:0:REAL`
    pub source_address: String,
    /// Source endpoint URL, e.g. `s7://192.168.0.1/0/1`
    pub source_url: String,
    /// Poll interval in milliseconds (never zero)
    pub poll_interval_ms: u64,
}

/// Identity of the destination twin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TwinIdentity {
    pub namespace: String,
    pub twin_id: String,
}

impl TwinIdentity {
    pub fn new(namespace: impl Into<String>, twin_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            twin_id: twin_id.into(),
        }
    }

    /// The destination record key, `namespace:twin_id`.
    pub fn thing_id(&self) -> String {
        format!("{}:{}", self.namespace, self.twin_id)
    }
}

impl fmt::Display for TwinIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.twin_id)
    }
}

/// Path of a property inside a feature, e.g. `configuration/temp`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath(String);

impl PropertyPath {
    /// Path of a configuration property.
    pub fn configuration(name: &str) -> Self {
        Self(format!("configuration/{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
