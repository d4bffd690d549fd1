//! Loading the thing and mapping documents from the model catalog or from disk.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tracing::{debug, info};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches JSON documents from the model catalog.
pub struct Catalog {
    client: reqwest::Client,
}

impl Catalog {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Load a document from `file` when given, otherwise GET it from `url`.
    pub async fn load(&self, what: &str, file: Option<&Path>, url: &str) -> Result<Value> {
        match file {
            Some(path) => read_document(what, path),
            None => self.fetch(what, url).await,
        }
    }

    async fn fetch(&self, what: &str, url: &str) -> Result<Value> {
        info!(%url, "Fetching {}", what);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {what} from {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("Failed to fetch {what} from {url}: HTTP {status}");
        }
        response
            .json()
            .await
            .with_context(|| format!("{what} from {url} is not valid JSON"))
    }
}

fn read_document(what: &str, path: &Path) -> Result<Value> {
    debug!(path = %path.display(), "Reading {}", what);
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {what} from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{what} in {} is not valid JSON", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"thingId": null}}"#).unwrap();
        let doc = read_document("thing document", file.path()).unwrap();
        assert!(doc.get("thingId").is_some());
    }

    #[test]
    fn test_read_document_errors() {
        let err = read_document("mapping", Path::new("/nonexistent/mapping.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read mapping"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = read_document("mapping", file.path()).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }
}
