//! Protocol driver implementations.

#[cfg(feature = "modbus")]
pub mod modbus;
#[cfg(feature = "s7")]
pub mod s7;
#[cfg(feature = "simulated")]
pub mod simulated;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::driver::{DriverError, DriverResult};

/// Read exactly `len` bytes, reporting a closed peer as a protocol error.
#[allow(dead_code)]
pub(crate) async fn read_exact_frame<R>(reader: &mut R, len: usize) -> DriverResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            DriverError::Protocol("connection closed mid-frame".to_string())
        } else {
            DriverError::Io(e)
        }
    })?;
    Ok(buf)
}

/// Split `ADDR:TYPE` at the last colon when the suffix is a type name.
pub(crate) fn split_type_suffix(address: &str) -> (&str, Option<&str>) {
    match address.rsplit_once(':') {
        Some((head, ty))
            if !ty.is_empty() && ty.chars().all(|c| c.is_ascii_alphabetic()) =>
        {
            (head, Some(ty))
        }
        _ => (address, None),
    }
}
