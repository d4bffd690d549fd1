//! Field values and per-field response codes.

use std::fmt;

use twinlink_core::{PropertyValue, ReadError, ValueType};

/// Per-field response code reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldStatus {
    Ok,
    NotFound,
    AccessDenied,
    InvalidAddress,
    InvalidDatatype,
    InternalError,
    ResponsePending,
}

impl FieldStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::NotFound => "NOT_FOUND",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::InvalidAddress => "INVALID_ADDRESS",
            Self::InvalidDatatype => "INVALID_DATATYPE",
            Self::InternalError => "INTERNAL_ERROR",
            Self::ResponsePending => "RESPONSE_PENDING",
        }
    }
}

impl fmt::Display for FieldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw value of a field as decoded by a driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Real(f64),
}

impl FieldValue {
    /// Convert to the declared property type.
    ///
    /// DOUBLE takes integers and finite reals. INT takes integers in `i32` range and
    /// finite reals, truncated toward zero. BOOLEAN takes bools and integers
    /// (non-zero is true).
    pub fn to_property(&self, value_type: ValueType) -> Result<PropertyValue, ReadError> {
        let mismatch = || {
            ReadError::Conversion(format!("cannot read {self} as {value_type}"))
        };
        match (value_type, *self) {
            (ValueType::Double, Self::Real(v)) if v.is_finite() => Ok(PropertyValue::Double(v)),
            (ValueType::Double, Self::Int(v)) => Ok(PropertyValue::Double(v as f64)),
            (ValueType::Int, Self::Int(v)) => {
                i32::try_from(v).map(PropertyValue::Int).map_err(|_| mismatch())
            }
            (ValueType::Int, Self::Real(v)) => {
                let truncated = v.trunc();
                if truncated.is_finite()
                    && truncated >= f64::from(i32::MIN)
                    && truncated <= f64::from(i32::MAX)
                {
                    Ok(PropertyValue::Int(truncated as i32))
                } else {
                    Err(mismatch())
                }
            }
            (ValueType::Boolean, Self::Bool(v)) => Ok(PropertyValue::Boolean(v)),
            (ValueType::Boolean, Self::Int(v)) => Ok(PropertyValue::Boolean(v != 0)),
            _ => Err(mismatch()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "BOOL({v})"),
            Self::Int(v) => write!(f, "INT({v})"),
            Self::Real(v) => write!(f, "REAL({v})"),
        }
    }
}
