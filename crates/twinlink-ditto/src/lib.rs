//! Eclipse Ditto client for twinlink.
//!
//! - **provision**: creates or replaces the thing over the HTTP API
//! - **live**: WebSocket connection sending property `modify` commands
//! - **protocol**: Ditto protocol envelopes

pub mod live;
pub mod protocol;
pub mod provision;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

pub use live::{DittoPublisher, LiveClientError};
pub use provision::{ProvisionError, TwinProvisioner};

/// Basic credentials for the HTTP API and the WebSocket handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Value of the `Authorization` header.
    pub fn basic_auth_header(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_header() {
        let credentials = Credentials::new("mqtt", "mqtt");
        assert_eq!(credentials.basic_auth_header(), "Basic bXF0dDptcXR0");
    }
}
