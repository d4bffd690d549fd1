//! Source protocol drivers for twinlink.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `s7` | ✅ | Siemens S7 over ISO-on-TCP (`s7://`) |
//! | `modbus` | ✅ | Modbus TCP (`modbus://`) |
//! | `simulated` | ✅ | In-process simulated source (`simulated://`) |
//! | `all` | ❌ | All drivers |
//!
//! ## Architecture
//!
//! - **Driver**: opens a [`Connection`] for an [`Endpoint`] of its URL scheme
//! - **DriverManager**: picks the driver by scheme
//! - **ProtocolReader**: the gateway's `SourceReader`; connects, reads one
//!   field within the read timeout, closes, converts the value

pub mod driver;
pub mod drivers;
pub mod endpoint;
pub mod field;
pub mod reader;

pub use driver::{
    available_drivers, Connection, Driver, DriverError, DriverManager, DriverResult,
    FieldResponse,
};
pub use endpoint::Endpoint;
pub use field::{FieldStatus, FieldValue};
pub use reader::ProtocolReader;

#[cfg(feature = "modbus")]
pub use drivers::modbus::ModbusDriver;
#[cfg(feature = "s7")]
pub use drivers::s7::S7Driver;
#[cfg(feature = "simulated")]
pub use drivers::simulated::SimulatedDriver;
