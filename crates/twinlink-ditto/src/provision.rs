//! Thing provisioning over the Ditto HTTP API.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use twinlink_core::TwinIdentity;

use crate::Credentials;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for provisioning.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The thing document is not a JSON object
    #[error("Thing document must be a JSON object")]
    InvalidDocument,

    /// Request could not be sent or no response arrived
    #[error("Provisioning request failed: {0}")]
    Transport(String),

    /// Ditto answered with a status of 300 or above
    #[error("Could not create twin {thing_id}: HTTP {status}: {body}")]
    Rejected {
        thing_id: String,
        status: u16,
        body: String,
    },
}

/// Creates or replaces the thing for a twin.
#[derive(Debug, Clone)]
pub struct TwinProvisioner {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl TwinProvisioner {
    /// `base_url` is the normalized Ditto endpoint, e.g. `https://ditto.example.com`.
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Result<Self, ProvisionError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProvisionError::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// URL of the thing resource.
    pub fn thing_url(&self, twin: &TwinIdentity) -> String {
        format!("{}/api/2/things/{}", self.base_url, twin.thing_id())
    }

    /// PUT the thing document with `thingId` set to the twin's thing id.
    ///
    /// Any status below 300 is success. Ditto answers 201 for a new thing and
    /// 204 when an existing one is replaced. Returns the status.
    pub async fn provision(
        &self,
        twin: &TwinIdentity,
        mut thing: Value,
    ) -> Result<u16, ProvisionError> {
        let thing_id = twin.thing_id();
        thing
            .as_object_mut()
            .ok_or(ProvisionError::InvalidDocument)?
            .insert("thingId".to_string(), Value::String(thing_id.clone()));

        let url = self.thing_url(twin);
        debug!(%url, "Provisioning twin");
        let response = self
            .client
            .put(&url)
            .header("Authorization", self.credentials.basic_auth_header())
            .json(&thing)
            .send()
            .await
            .map_err(|e| ProvisionError::Transport(format!("PUT {url}: {e}")))?;

        let status = response.status().as_u16();
        if status >= 300 {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::Rejected {
                thing_id,
                status,
                body,
            });
        }

        info!(%thing_id, status, "Twin provisioned");
        Ok(status)
    }
}
