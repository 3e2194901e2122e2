use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::retry::{with_retry, RetryConfig};
use crate::config::ServiceEndpoint;
use crate::error::ServiceError;

/// A media file sent inline as base64.
#[derive(Debug, Clone, Serialize)]
pub struct MediaPayload {
    pub filename: String,
    pub data: String,
}

impl MediaPayload {
    pub fn from_path(path: &Path) -> Result<Self, ServiceError> {
        let bytes = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            filename,
            data: BASE64.encode(bytes),
        })
    }

    pub fn from_text(filename: &str, text: &str) -> Self {
        Self {
            filename: filename.to_string(),
            data: BASE64.encode(text.as_bytes()),
        }
    }
}

/// Blocking JSON client for one analysis service.
pub struct ServiceClient {
    service: &'static str,
    endpoint: String,
    agent: ureq::Agent,
    retry: RetryConfig,
}

impl ServiceClient {
    pub fn new(service: &'static str, config: &ServiceEndpoint) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();

        Self {
            service,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            agent,
            retry: RetryConfig::from(config),
        }
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    pub fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ServiceError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        with_retry(&self.retry, &url, || {
            debug!(service = self.service, url = %url, "POST");
            let response = self
                .agent
                .post(&url)
                .set("Content-Type", "application/json")
                .send_json(body)
                .map_err(|e| ServiceError::from_ureq(self.service, e))?;
            response
                .into_json()
                .map_err(|e| ServiceError::decode(self.service, e))
        })
    }

    pub fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ServiceError> {
        let url = self.url(path);
        with_retry(&self.retry, &url, || {
            debug!(service = self.service, url = %url, "GET");
            let response = self
                .agent
                .get(&url)
                .call()
                .map_err(|e| ServiceError::from_ureq(self.service, e))?;
            response
                .into_json()
                .map_err(|e| ServiceError::decode(self.service, e))
        })
    }

    /// Stream a binary response to `dest`. The file only appears once the
    /// body has been fully written.
    pub fn get_to_file(&self, path: &str, dest: &Path) -> Result<(), ServiceError> {
        let url = self.url(path);
        let partial = dest.with_extension("part");
        with_retry(&self.retry, &url, || {
            debug!(service = self.service, url = %url, dest = %dest.display(), "GET to file");
            let response = self
                .agent
                .get(&url)
                .call()
                .map_err(|e| ServiceError::from_ureq(self.service, e))?;
            let mut reader = response.into_reader();
            let mut file = std::fs::File::create(&partial)?;
            std::io::copy(&mut reader, &mut file).map_err(|e| ServiceError::Transport {
                service: self.service,
                message: e.to_string(),
            })?;
            Ok(())
        })?;
        std::fs::rename(&partial, dest)?;
        Ok(())
    }
}
