//! Siemens S7 driver (S7comm over ISO-on-TCP).
//!
//! Endpoint: `s7://host[:port]/rack/slot`, port 102 by default.
//!
//! Addresses:
//! ```text
//! %DB1:0:REAL        data block 1, byte 0
//! %DB1:4.3:BOOL      data block 1, byte 4, bit 3
//! %DB1.DBD8:DINT     long data block form
//! %M10:INT           flags, byte 10
//! %I0.1:BOOL         inputs, byte 0, bit 1
//! %Q2:BYTE           outputs, byte 2
//! ```
//!
//! A read opens the transport (TPKT/COTP connection request), negotiates the
//! PDU with a setup-communication job, and issues one read-var job for one item.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use super::{read_exact_frame, split_type_suffix};
use crate::driver::{Connection, Driver, DriverError, DriverResult, FieldResponse};
use crate::endpoint::Endpoint;
use crate::field::{FieldStatus, FieldValue};

const DEFAULT_PORT: u16 = 102;
const DEFAULT_RACK: u8 = 0;
const DEFAULT_SLOT: u8 = 1;

const TPKT_VERSION: u8 = 0x03;
const COTP_CONNECT_REQUEST: u8 = 0xE0;
const COTP_CONNECT_CONFIRM: u8 = 0xD0;
const COTP_DATA: u8 = 0xF0;
const S7_PROTOCOL_ID: u8 = 0x32;
const ROSCTR_JOB: u8 = 0x01;
const ROSCTR_ACK_DATA: u8 = 0x03;
const FUNC_SETUP_COMMUNICATION: u8 = 0xF0;
const FUNC_READ_VAR: u8 = 0x04;
const RETURN_CODE_SUCCESS: u8 = 0xFF;
/// Largest byte offset whose bit address fits the 3-byte item address.
const MAX_BYTE_OFFSET: u32 = 0x1F_FFFF;

/// Offset of the S7 header in a TPKT frame (TPKT 4 + COTP data 3).
const S7_HEADER_OFFSET: usize = 7;
/// Length of an ack-data header.
const ACK_HEADER_LEN: usize = 12;

/// Memory area of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7Area {
    Inputs,
    Outputs,
    Flags,
    DataBlock(u16),
}

impl S7Area {
    fn code(&self) -> u8 {
        match self {
            Self::Inputs => 0x81,
            Self::Outputs => 0x82,
            Self::Flags => 0x83,
            Self::DataBlock(_) => 0x84,
        }
    }

    fn db_number(&self) -> u16 {
        match self {
            Self::DataBlock(n) => *n,
            _ => 0,
        }
    }
}

/// Data type of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S7Type {
    Bool,
    Byte,
    Word,
    Int,
    DWord,
    DInt,
    Real,
}

impl S7Type {
    fn parse(tag: &str) -> Option<Self> {
        match tag.to_ascii_uppercase().as_str() {
            "BOOL" => Some(Self::Bool),
            "BYTE" | "USINT" => Some(Self::Byte),
            "WORD" | "UINT" => Some(Self::Word),
            "INT" => Some(Self::Int),
            "DWORD" | "UDINT" => Some(Self::DWord),
            "DINT" => Some(Self::DInt),
            "REAL" => Some(Self::Real),
            _ => None,
        }
    }

    /// Size in bytes.
    fn size(&self) -> u16 {
        match self {
            Self::Bool | Self::Byte => 1,
            Self::Word | Self::Int => 2,
            Self::DWord | Self::DInt | Self::Real => 4,
        }
    }

    /// Transport size of the request item: BIT for BOOL, BYTE otherwise.
    fn transport_size(&self) -> u8 {
        match self {
            Self::Bool => 0x01,
            _ => 0x02,
        }
    }

    fn decode(&self, data: &[u8]) -> Option<FieldValue> {
        let value = match self {
            Self::Bool => FieldValue::Bool(data.first()? & 0x01 != 0),
            Self::Byte => FieldValue::Int(i64::from(*data.first()?)),
            Self::Word => FieldValue::Int(i64::from(u16::from_be_bytes(data.get(..2)?.try_into().ok()?))),
            Self::Int => FieldValue::Int(i64::from(i16::from_be_bytes(data.get(..2)?.try_into().ok()?))),
            Self::DWord => FieldValue::Int(i64::from(u32::from_be_bytes(data.get(..4)?.try_into().ok()?))),
            Self::DInt => FieldValue::Int(i64::from(i32::from_be_bytes(data.get(..4)?.try_into().ok()?))),
            Self::Real => FieldValue::Real(f64::from(f32::from_be_bytes(data.get(..4)?.try_into().ok()?))),
        };
        Some(value)
    }
}

/// A parsed S7 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S7Address {
    pub area: S7Area,
    pub byte_offset: u32,
    pub bit: u8,
    pub data_type: S7Type,
}

impl S7Address {
    pub fn parse(address: &str) -> DriverResult<Self> {
        let invalid = |reason: &str| DriverError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let (location, type_tag) = split_type_suffix(address);
        let type_tag = type_tag.ok_or_else(|| invalid("missing data type suffix"))?;
        let data_type = S7Type::parse(type_tag).ok_or_else(|| invalid("unknown data type"))?;
        let location = location
            .strip_prefix('%')
            .ok_or_else(|| invalid("address must start with '%'"))?;

        let (area, offset) = if let Some(rest) = location.strip_prefix("DB") {
            // %DB1:0 or %DB1.DBX0.0 / %DB1.DBD8
            let (db, offset) = rest
                .split_once(':')
                .or_else(|| {
                    rest.split_once(".DB").map(|(db, o)| {
                        (db, o.trim_start_matches(|c| matches!(c, 'X' | 'B' | 'W' | 'D')))
                    })
                })
                .ok_or_else(|| invalid("missing data block offset"))?;
            let db = db.parse::<u16>().map_err(|_| invalid("bad data block number"))?;
            (S7Area::DataBlock(db), offset)
        } else {
            let mut chars = location.chars();
            let area = match chars.next() {
                Some('I') | Some('E') => S7Area::Inputs,
                Some('Q') | Some('A') => S7Area::Outputs,
                Some('M') => S7Area::Flags,
                _ => return Err(invalid("unknown memory area")),
            };
            // Size letters (%MW10, %MD4) are implied by the data type.
            let offset = chars
                .as_str()
                .trim_start_matches(|c| matches!(c, 'X' | 'B' | 'W' | 'D'))
                .trim_start_matches(':');
            (area, offset)
        };

        let (byte, bit) = match offset.split_once('.') {
            Some((byte, bit)) => (byte, Some(bit)),
            None => (offset, None),
        };
        let byte_offset = byte
            .parse::<u32>()
            .ok()
            .filter(|b| *b <= MAX_BYTE_OFFSET)
            .ok_or_else(|| invalid("bad byte offset"))?;
        let bit = match bit {
            Some(b) => b.parse::<u8>().ok().filter(|b| *b < 8).ok_or_else(|| invalid("bad bit offset"))?,
            None => 0,
        };
        if bit != 0 && data_type != S7Type::Bool {
            return Err(invalid("bit offset is only valid for BOOL"));
        }

        Ok(Self {
            area,
            byte_offset,
            bit,
            data_type,
        })
    }

    /// Bit address of the item, `byte * 8 + bit`, as 3 bytes.
    fn item_address(&self) -> [u8; 3] {
        let bits = self.byte_offset * 8 + u32::from(self.bit);
        let b = bits.to_be_bytes();
        [b[1], b[2], b[3]]
    }
}

/// S7 driver.
#[derive(Debug, Default)]
pub struct S7Driver;

impl S7Driver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for S7Driver {
    fn scheme(&self) -> &'static str {
        "s7"
    }

    fn validate_address(&self, address: &str) -> DriverResult<()> {
        S7Address::parse(address).map(|_| ())
    }

    async fn connect(&self, endpoint: &Endpoint) -> DriverResult<Box<dyn Connection>> {
        let rack = path_number(endpoint, 0, DEFAULT_RACK)?;
        let slot = path_number(endpoint, 1, DEFAULT_SLOT)?;
        let addr = endpoint.socket_address(DEFAULT_PORT);

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| DriverError::Connection(format!("{addr}: {e}")))?;
        let mut connection = S7Connection {
            stream,
            pdu_ref: 0,
        };
        connection.open_transport(rack, slot).await?;
        connection.setup_communication().await?;
        debug!(%endpoint, rack, slot, "S7 connection established");
        Ok(Box::new(connection))
    }
}

fn path_number(endpoint: &Endpoint, index: usize, default: u8) -> DriverResult<u8> {
    match endpoint.path.get(index) {
        Some(segment) => segment
            .parse()
            .map_err(|_| DriverError::InvalidUrl(format!("{endpoint}: bad rack/slot '{segment}'"))),
        None => Ok(default),
    }
}

struct S7Connection {
    stream: TcpStream,
    pdu_ref: u16,
}

impl S7Connection {
    async fn open_transport(&mut self, rack: u8, slot: u8) -> DriverResult<()> {
        let remote_tsap = [0x01, rack.wrapping_mul(0x20).wrapping_add(slot)];
        let cotp = [
            0x11,
            COTP_CONNECT_REQUEST,
            0x00, 0x00, // destination reference
            0x00, 0x01, // source reference
            0x00, // class 0
            0xC0, 0x01, 0x0A, // TPDU size 1024
            0xC1, 0x02, 0x01, 0x00, // calling TSAP
            0xC2, 0x02, remote_tsap[0], remote_tsap[1], // called TSAP
        ];
        self.stream.write_all(&tpkt(&cotp)).await?;

        let frame = self.read_tpkt().await?;
        if frame.get(5) != Some(&COTP_CONNECT_CONFIRM) {
            return Err(DriverError::Connection(
                "ISO transport connection refused".to_string(),
            ));
        }
        Ok(())
    }

    async fn setup_communication(&mut self) -> DriverResult<()> {
        let params = [
            FUNC_SETUP_COMMUNICATION,
            0x00,
            0x00, 0x01, // max AmQ calling
            0x00, 0x01, // max AmQ called
            0x01, 0xE0, // PDU length 480
        ];
        let frame = self.job(&params).await?;
        ack_data(&frame)?;
        Ok(())
    }

    /// Send a job with the given parameters and return the response frame.
    async fn job(&mut self, params: &[u8]) -> DriverResult<Vec<u8>> {
        self.pdu_ref = self.pdu_ref.wrapping_add(1);
        let mut payload = vec![0x02, COTP_DATA, 0x80];
        payload.extend_from_slice(&[S7_PROTOCOL_ID, ROSCTR_JOB, 0x00, 0x00]);
        payload.extend_from_slice(&self.pdu_ref.to_be_bytes());
        payload.extend_from_slice(&(params.len() as u16).to_be_bytes());
        payload.extend_from_slice(&0u16.to_be_bytes());
        payload.extend_from_slice(params);
        self.stream.write_all(&tpkt(&payload)).await?;
        self.read_tpkt().await
    }

    async fn read_tpkt(&mut self) -> DriverResult<Vec<u8>> {
        let mut frame = read_exact_frame(&mut self.stream, 4).await?;
        if frame[0] != TPKT_VERSION {
            return Err(DriverError::Protocol(format!(
                "unexpected TPKT version {:#04x}",
                frame[0]
            )));
        }
        let len = usize::from(u16::from_be_bytes([frame[2], frame[3]]));
        if len < 7 {
            return Err(DriverError::Protocol(format!("TPKT length {len} too short")));
        }
        frame.extend(read_exact_frame(&mut self.stream, len - 4).await?);
        Ok(frame)
    }
}

#[async_trait]
impl Connection for S7Connection {
    async fn read(&mut self, address: &str) -> DriverResult<FieldResponse> {
        let address = S7Address::parse(address)?;
        let length = address.data_type.size();
        let db = address.area.db_number().to_be_bytes();
        let len = length.to_be_bytes();
        let item = address.item_address();
        let params = [
            FUNC_READ_VAR,
            0x01, // item count
            0x12, 0x0A, 0x10, // variable specification, any-pointer syntax
            address.data_type.transport_size(),
            len[0], len[1],
            db[0], db[1],
            address.area.code(),
            item[0], item[1], item[2],
        ];

        let frame = self.job(&params).await?;
        let data_offset = ack_data(&frame)?;
        // Read-var parameters are function + item count.
        let item_offset = data_offset + 2;
        let return_code = *frame
            .get(item_offset)
            .ok_or_else(|| DriverError::Protocol("missing read item".to_string()))?;
        if return_code != RETURN_CODE_SUCCESS {
            return Ok(FieldResponse::failed(status_for_return_code(return_code)));
        }

        let transport = frame.get(item_offset + 1).copied().unwrap_or_default();
        let raw_len = frame
            .get(item_offset + 2..item_offset + 4)
            .map(|b| usize::from(u16::from_be_bytes([b[0], b[1]])))
            .ok_or_else(|| DriverError::Protocol("missing item length".to_string()))?;
        // BIT, BYTE/WORD/DWORD and INTEGER lengths are given in bits.
        let byte_len = match transport {
            0x03 | 0x04 | 0x05 => raw_len.div_ceil(8),
            _ => raw_len,
        };
        let data = frame
            .get(item_offset + 4..item_offset + 4 + byte_len)
            .ok_or_else(|| DriverError::Protocol("truncated item data".to_string()))?;

        match address.data_type.decode(data) {
            Some(value) => Ok(FieldResponse::ok(value)),
            None => Ok(FieldResponse::failed(FieldStatus::InvalidDatatype)),
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// Validate an ack-data frame and return the offset of its parameters.
fn ack_data(frame: &[u8]) -> DriverResult<usize> {
    let header = frame
        .get(S7_HEADER_OFFSET..S7_HEADER_OFFSET + ACK_HEADER_LEN)
        .ok_or_else(|| DriverError::Protocol("short S7 response".to_string()))?;
    if header[0] != S7_PROTOCOL_ID || header[1] != ROSCTR_ACK_DATA {
        return Err(DriverError::Protocol(format!(
            "unexpected S7 header {:#04x}/{:#04x}",
            header[0], header[1]
        )));
    }
    let (error_class, error_code) = (header[10], header[11]);
    if error_class != 0 || error_code != 0 {
        return Err(DriverError::Protocol(format!(
            "S7 error class {error_class:#04x} code {error_code:#04x}"
        )));
    }
    Ok(S7_HEADER_OFFSET + ACK_HEADER_LEN)
}

fn status_for_return_code(code: u8) -> FieldStatus {
    match code {
        0x03 => FieldStatus::AccessDenied,
        0x05 => FieldStatus::InvalidAddress,
        0x06 | 0x07 => FieldStatus::InvalidDatatype,
        0x0A => FieldStatus::NotFound,
        _ => FieldStatus::InternalError,
    }
}

fn tpkt(payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() + 4) as u16;
    let mut frame = Vec::with_capacity(usize::from(len));
    frame.extend_from_slice(&[TPKT_VERSION, 0x00]);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}
