//! Shared configuration defaults and helpers.
//!
//! Constants, environment variable names, and endpoint normalization used by
//! the binary and the client crates.

use std::time::Duration;

use crate::mapping::ModelCoordinates;
use crate::model::TwinIdentity;

/// Fixed timeout for a single protocol read
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a published update waits for the destination's response
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of poll workers
pub const DEFAULT_WORKERS: usize = 4;

/// Default command-line values
pub mod defaults {
    pub const NAMESPACE: &str = "org.apache.plc4x.examples";
    pub const MODEL_NAME: &str = "VirtualMachine";
    pub const MODEL_VERSION: &str = "1.0.0";
    pub const MAPPING: &str = "demoSpsPragmatics";
    pub const DITTO_ENDPOINT: &str = "twin.pragmaticindustries.de/";
    pub const CATALOG_ENDPOINT: &str = "https://vorto.eclipse.org";
    pub const USERNAME: &str = "mqtt";
    pub const PASSWORD: &str = "mqtt";
}

/// Environment variable names
pub mod env_vars {
    pub const DITTO_USERNAME: &str = "DITTO_USERNAME";
    pub const DITTO_PASSWORD: &str = "DITTO_PASSWORD";
    /// `true` switches log output to JSON
    pub const LOG_JSON: &str = "TWINLINK_LOG_JSON";

    /// Ditto user name from the environment, or the default.
    pub fn ditto_username() -> String {
        std::env::var(DITTO_USERNAME).unwrap_or_else(|_| super::defaults::USERNAME.to_string())
    }

    /// Ditto password from the environment, or the default.
    pub fn ditto_password() -> String {
        std::env::var(DITTO_PASSWORD).unwrap_or_else(|_| super::defaults::PASSWORD.to_string())
    }

    /// Whether JSON logging was requested.
    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false)
    }
}

/// Normalize a Ditto endpoint into a base URL without trailing slash.
///
/// A bare host (`twin.example.com/`) gets `https://`. An explicit `http://` is
/// kept so a local Ditto can be used.
pub fn normalize_ditto_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

/// WebSocket URL of the Ditto live channel for a normalized base URL.
pub fn ditto_websocket_url(base: &str) -> String {
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("wss://{base}")
    };
    format!("{ws_base}/ws/2")
}

/// Random twin id: a v4 UUID without dashes.
pub fn generate_twin_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Resolved runtime settings of one gateway run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub model: ModelCoordinates,
    /// Mapping name in the model catalog
    pub mapping: String,
    /// Normalized Ditto base URL
    pub ditto_base_url: String,
    /// Model catalog base URL, no trailing slash
    pub catalog_base_url: String,
    pub twin: TwinIdentity,
    pub workers: usize,
}

impl GatewayConfig {
    pub fn new(
        model: ModelCoordinates,
        mapping: impl Into<String>,
        ditto_endpoint: &str,
        catalog_endpoint: &str,
        twin_id: Option<String>,
        workers: usize,
    ) -> Self {
        let twin_id = twin_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(generate_twin_id);
        Self {
            twin: TwinIdentity::new(model.namespace.clone(), twin_id),
            model,
            mapping: mapping.into(),
            ditto_base_url: normalize_ditto_endpoint(ditto_endpoint),
            catalog_base_url: catalog_endpoint.trim().trim_end_matches('/').to_string(),
            workers: workers.max(1),
        }
    }

    pub fn websocket_url(&self) -> String {
        ditto_websocket_url(&self.ditto_base_url)
    }

    /// Feature receiving the configuration properties: the model name lowercased.
    pub fn feature_id(&self) -> String {
        self.model.name.to_lowercase()
    }

    /// Catalog URL of the thing document generated for the model.
    pub fn thing_document_url(&self) -> String {
        format!(
            "{}/api/v1/generators/eclipseditto/models/{}?target=thingJson",
            self.catalog_base_url,
            self.model.model_id()
        )
    }

    /// Catalog URL of the mapping content document.
    pub fn mapping_document_url(&self) -> String {
        format!(
            "{}/api/v1/models/{}/content/{}",
            self.catalog_base_url,
            self.model.model_id(),
            self.mapping
        )
    }
}
