//! In-process simulated source, for demos and tests without hardware.
//!
//! Endpoint: `simulated://<name>`. Addresses:
//! ```text
//! RANDOM/<id>:<TYPE>   a fresh random value on every read
//! STATE/<id>:<TYPE>    the value last stored with `set_state`, zero/false if unset
//! ```
//! Types are `BOOL`, `INT`, `DINT` and `REAL`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;

use super::split_type_suffix;
use crate::driver::{Connection, Driver, DriverError, DriverResult, FieldResponse};
use crate::endpoint::Endpoint;
use crate::field::{FieldStatus, FieldValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimKind {
    Random,
    State,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimType {
    Bool,
    Int,
    Real,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SimAddress {
    kind: SimKind,
    id: String,
    data_type: SimType,
}

impl SimAddress {
    fn parse(address: &str) -> DriverResult<Self> {
        let invalid = |reason: &str| DriverError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let (location, type_tag) = split_type_suffix(address);
        let data_type = match type_tag.map(str::to_ascii_uppercase).as_deref() {
            Some("BOOL") => SimType::Bool,
            Some("INT") | Some("DINT") => SimType::Int,
            Some("REAL") => SimType::Real,
            Some(_) => return Err(invalid("unknown data type")),
            None => return Err(invalid("missing data type suffix")),
        };
        let (kind, id) = location
            .split_once('/')
            .ok_or_else(|| invalid("expected RANDOM/<id> or STATE/<id>"))?;
        let kind = match kind.to_ascii_uppercase().as_str() {
            "RANDOM" => SimKind::Random,
            "STATE" => SimKind::State,
            _ => return Err(invalid("unknown simulation kind")),
        };
        if id.is_empty() {
            return Err(invalid("missing id"));
        }
        Ok(Self {
            kind,
            id: id.to_string(),
            data_type,
        })
    }

    fn zero(&self) -> FieldValue {
        match self.data_type {
            SimType::Bool => FieldValue::Bool(false),
            SimType::Int => FieldValue::Int(0),
            SimType::Real => FieldValue::Real(0.0),
        }
    }

    fn random(&self) -> FieldValue {
        let mut rng = rand::thread_rng();
        match self.data_type {
            SimType::Bool => FieldValue::Bool(rng.gen()),
            SimType::Int => FieldValue::Int(rng.gen_range(0..=100)),
            SimType::Real => FieldValue::Real(rng.gen_range(0.0..100.0)),
        }
    }
}

type StateStore = Arc<RwLock<HashMap<(String, String), FieldValue>>>;

/// Simulated driver. Clones share the same state store.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDriver {
    state: StateStore,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the value returned by `STATE/<id>` reads on device `device`.
    pub fn set_state(&self, device: &str, id: &str, value: FieldValue) {
        self.state
            .write()
            .insert((device.to_string(), id.to_string()), value);
    }
}

#[async_trait]
impl Driver for SimulatedDriver {
    fn scheme(&self) -> &'static str {
        "simulated"
    }

    fn validate_address(&self, address: &str) -> DriverResult<()> {
        SimAddress::parse(address).map(|_| ())
    }

    async fn connect(&self, endpoint: &Endpoint) -> DriverResult<Box<dyn Connection>> {
        Ok(Box::new(SimulatedConnection {
            device: endpoint.host.clone(),
            state: self.state.clone(),
        }))
    }
}

struct SimulatedConnection {
    device: String,
    state: StateStore,
}

#[async_trait]
impl Connection for SimulatedConnection {
    async fn read(&mut self, address: &str) -> DriverResult<FieldResponse> {
        let address = SimAddress::parse(address)?;
        let value = match address.kind {
            SimKind::Random => address.random(),
            SimKind::State => self
                .state
                .read()
                .get(&(self.device.clone(), address.id.clone()))
                .copied()
                .unwrap_or_else(|| address.zero()),
        };

        let matches_type = matches!(
            (address.data_type, value),
            (SimType::Bool, FieldValue::Bool(_))
                | (SimType::Int, FieldValue::Int(_))
                | (SimType::Real, FieldValue::Real(_))
        );
        if matches_type {
            Ok(FieldResponse::ok(value))
        } else {
            Ok(FieldResponse::failed(FieldStatus::InvalidDatatype))
        }
    }

    async fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_reads() {
        let driver = SimulatedDriver::new();
        let endpoint = Endpoint::parse("simulated://line1").unwrap();
        let mut conn = driver.connect(&endpoint).await.unwrap();

        let response = conn.read("STATE/speed:REAL").await.unwrap();
        assert_eq!(response, FieldResponse::ok(FieldValue::Real(0.0)));

        driver.set_state("line1", "speed", FieldValue::Real(12.5));
        let response = conn.read("STATE/speed:REAL").await.unwrap();
        assert_eq!(response, FieldResponse::ok(FieldValue::Real(12.5)));

        let response = conn.read("STATE/speed:BOOL").await.unwrap();
        assert_eq!(response.status, FieldStatus::InvalidDatatype);

        // State is per device.
        let other = Endpoint::parse("simulated://line2").unwrap();
        let mut conn = driver.connect(&other).await.unwrap();
        let response = conn.read("STATE/speed:REAL").await.unwrap();
        assert_eq!(response.value, Some(FieldValue::Real(0.0)));
    }

    #[tokio::test]
    async fn test_random_reads() {
        let driver = SimulatedDriver::new();
        let endpoint = Endpoint::parse("simulated://demo").unwrap();
        let mut conn = driver.connect(&endpoint).await.unwrap();

        for _ in 0..20 {
            match conn.read("RANDOM/temp:REAL").await.unwrap().value {
                Some(FieldValue::Real(v)) => assert!((0.0..100.0).contains(&v)),
                other => panic!("unexpected value {other:?}"),
            }
        }
        assert!(matches!(
            conn.read("RANDOM/on:BOOL").await.unwrap().value,
            Some(FieldValue::Bool(_))
        ));
    }

    #[test]
    fn test_invalid_addresses() {
        let driver = SimulatedDriver::new();
        for address in ["RANDOM/x", "NOISE/x:REAL", "STATE/:INT", "STATE/x:STRING", "x:REAL"] {
            assert!(driver.validate_address(address).is_err(), "{address}");
        }
        assert!(driver.validate_address("STATE/x:dint").is_ok());
    }
}
