//! Modbus TCP driver.
//!
//! Endpoint: `modbus://host[:port][?unit-identifier=N]`, port 502 and unit 1
//! by default.
//!
//! Addresses use 0-based protocol addresses:
//! ```text
//! coil:N
//! discrete-input:N
//! input-register:N[:TYPE]
//! holding-register:N[:TYPE]
//! ```
//! Register types are `INT` (default), `UINT`, `DINT` and `REAL`. 32-bit types
//! span two registers, high word first.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use super::{read_exact_frame, split_type_suffix};
use crate::driver::{Connection, Driver, DriverError, DriverResult, FieldResponse};
use crate::endpoint::Endpoint;
use crate::field::{FieldStatus, FieldValue};

const DEFAULT_PORT: u16 = 502;
const DEFAULT_UNIT_ID: u8 = 1;
const UNIT_ID_PARAM: &str = "unit-identifier";

const MBAP_HEADER_LEN: usize = 7;
const MAX_PDU_LEN: usize = 253;
const EXCEPTION_FLAG: u8 = 0x80;

/// Modbus object table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModbusTable {
    Coil,
    DiscreteInput,
    InputRegister,
    HoldingRegister,
}

impl ModbusTable {
    fn function_code(&self) -> u8 {
        match self {
            Self::Coil => 0x01,
            Self::DiscreteInput => 0x02,
            Self::HoldingRegister => 0x03,
            Self::InputRegister => 0x04,
        }
    }

    fn is_bit(&self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }
}

/// Register interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterType {
    Int,
    UInt,
    DInt,
    Real,
}

impl RegisterType {
    fn parse(tag: &str) -> Option<Self> {
        match tag.to_ascii_uppercase().as_str() {
            "INT" => Some(Self::Int),
            "UINT" | "WORD" => Some(Self::UInt),
            "DINT" => Some(Self::DInt),
            "REAL" => Some(Self::Real),
            _ => None,
        }
    }

    fn register_count(&self) -> u16 {
        match self {
            Self::Int | Self::UInt => 1,
            Self::DInt | Self::Real => 2,
        }
    }

    fn decode(&self, regs: &[u16]) -> Option<FieldValue> {
        let value = match self {
            Self::Int => FieldValue::Int(i64::from(*regs.first()? as i16)),
            Self::UInt => FieldValue::Int(i64::from(*regs.first()?)),
            Self::DInt => {
                let raw = (u32::from(*regs.first()?) << 16) | u32::from(*regs.get(1)?);
                FieldValue::Int(i64::from(raw as i32))
            }
            Self::Real => {
                let raw = (u32::from(*regs.first()?) << 16) | u32::from(*regs.get(1)?);
                FieldValue::Real(f64::from(f32::from_bits(raw)))
            }
        };
        Some(value)
    }
}

/// A parsed Modbus address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModbusAddress {
    pub table: ModbusTable,
    pub address: u16,
    /// Ignored for coils and discrete inputs
    pub register_type: RegisterType,
}

impl ModbusAddress {
    pub fn parse(address: &str) -> DriverResult<Self> {
        let invalid = |reason: &str| DriverError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let (location, type_tag) = split_type_suffix(address);
        let (table, number) = location
            .split_once(':')
            .ok_or_else(|| invalid("expected <table>:<address>"))?;
        let table = match table.to_ascii_lowercase().as_str() {
            "coil" => ModbusTable::Coil,
            "discrete-input" => ModbusTable::DiscreteInput,
            "input-register" => ModbusTable::InputRegister,
            "holding-register" => ModbusTable::HoldingRegister,
            _ => return Err(invalid("unknown table")),
        };
        let address_number = number
            .parse::<u16>()
            .map_err(|_| invalid("bad register address"))?;

        let register_type = match type_tag {
            None => RegisterType::Int,
            Some(tag) if table.is_bit() && tag.eq_ignore_ascii_case("BOOL") => RegisterType::Int,
            Some(_) if table.is_bit() => return Err(invalid("bit tables only hold BOOL")),
            Some(tag) => RegisterType::parse(tag).ok_or_else(|| invalid("unknown data type"))?,
        };

        Ok(Self {
            table,
            address: address_number,
            register_type,
        })
    }

    fn quantity(&self) -> u16 {
        if self.table.is_bit() {
            1
        } else {
            self.register_type.register_count()
        }
    }
}

/// Modbus TCP driver.
#[derive(Debug, Default)]
pub struct ModbusDriver;

impl ModbusDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for ModbusDriver {
    fn scheme(&self) -> &'static str {
        "modbus"
    }

    fn validate_address(&self, address: &str) -> DriverResult<()> {
        ModbusAddress::parse(address).map(|_| ())
    }

    async fn connect(&self, endpoint: &Endpoint) -> DriverResult<Box<dyn Connection>> {
        let unit_id = match endpoint.query_param(UNIT_ID_PARAM) {
            Some(v) => v.parse::<u8>().map_err(|_| {
                DriverError::InvalidUrl(format!("{endpoint}: bad {UNIT_ID_PARAM} '{v}'"))
            })?,
            None => DEFAULT_UNIT_ID,
        };
        let addr = endpoint.socket_address(DEFAULT_PORT);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| DriverError::Connection(format!("{addr}: {e}")))?;
        debug!(%endpoint, unit_id, "Modbus connection established");
        Ok(Box::new(ModbusConnection {
            stream,
            unit_id,
            transaction_id: 0,
        }))
    }
}

struct ModbusConnection {
    stream: TcpStream,
    unit_id: u8,
    transaction_id: u16,
}

impl ModbusConnection {
    /// Send a request PDU and return the response PDU.
    async fn request(&mut self, pdu: &[u8]) -> DriverResult<Vec<u8>> {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        self.stream
            .write_all(&encode_frame(self.transaction_id, self.unit_id, pdu))
            .await?;

        let header = read_exact_frame(&mut self.stream, MBAP_HEADER_LEN).await?;
        let transaction_id = u16::from_be_bytes([header[0], header[1]]);
        let protocol_id = u16::from_be_bytes([header[2], header[3]]);
        let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
        if protocol_id != 0 {
            return Err(DriverError::Protocol(format!("protocol id {protocol_id}")));
        }
        if length < 2 || length > MAX_PDU_LEN + 1 {
            return Err(DriverError::Protocol(format!("MBAP length {length}")));
        }
        let pdu = read_exact_frame(&mut self.stream, length - 1).await?;
        if transaction_id != self.transaction_id {
            return Err(DriverError::Protocol(format!(
                "transaction id {transaction_id}, expected {}",
                self.transaction_id
            )));
        }
        Ok(pdu)
    }
}

#[async_trait]
impl Connection for ModbusConnection {
    async fn read(&mut self, address: &str) -> DriverResult<FieldResponse> {
        let address = ModbusAddress::parse(address)?;
        let function = address.table.function_code();
        let start = address.address.to_be_bytes();
        let quantity = address.quantity().to_be_bytes();
        let pdu = self
            .request(&[function, start[0], start[1], quantity[0], quantity[1]])
            .await?;

        match pdu.first() {
            Some(&code) if code == function | EXCEPTION_FLAG => {
                let exception = pdu.get(1).copied().unwrap_or_default();
                return Ok(FieldResponse::failed(status_for_exception(exception)));
            }
            Some(&code) if code == function => {}
            other => {
                return Err(DriverError::Protocol(format!(
                    "unexpected function code {other:?}"
                )))
            }
        }

        let byte_count = usize::from(pdu.get(1).copied().unwrap_or_default());
        let data = pdu
            .get(2..2 + byte_count)
            .ok_or_else(|| DriverError::Protocol("truncated response data".to_string()))?;

        if address.table.is_bit() {
            let bit = data
                .first()
                .ok_or_else(|| DriverError::Protocol("empty bit response".to_string()))?;
            return Ok(FieldResponse::ok(FieldValue::Bool(bit & 0x01 != 0)));
        }

        let registers: Vec<u16> = data
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        match address.register_type.decode(&registers) {
            Some(value) => Ok(FieldResponse::ok(value)),
            None => Err(DriverError::Protocol(format!(
                "expected {} registers, got {}",
                address.quantity(),
                registers.len()
            ))),
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

fn encode_frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&((pdu.len() + 1) as u16).to_be_bytes());
    frame.push(unit_id);
    frame.extend_from_slice(pdu);
    frame
}

fn status_for_exception(code: u8) -> FieldStatus {
    match code {
        0x02 => FieldStatus::InvalidAddress,
        0x03 => FieldStatus::InvalidDatatype,
        0x05..=0x07 => FieldStatus::ResponsePending,
        0x01 | 0x0A | 0x0B => FieldStatus::NotFound,
        _ => FieldStatus::InternalError,
    }
}
