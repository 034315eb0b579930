//! Result delivery to an external compliance endpoint.
//!
//! Delivery is strictly best-effort from the scan's point of view: an
//! unreachable endpoint degrades to a logged no-op, and callers treat any
//! returned error as log-only.

use crate::error::{Result, ScanError};
use crate::scanner::types::ScanResult;
use log::{info, warn};
use serde::Deserialize;
use std::time::Duration;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Server acknowledgement for an uploaded result.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadReceipt {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: String,
}

pub struct DeliveryClient {
    endpoint: String,
    token: String,
    http: reqwest::blocking::Client,
}

impl DeliveryClient {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(ScanError::Config("delivery endpoint is empty".into()));
        }
        let http = reqwest::blocking::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .map_err(|e| ScanError::Delivery(e.to_string()))?;
        Ok(Self {
            endpoint,
            token: token.into(),
            http,
        })
    }

    /// Upload a scan result. A transport failure (endpoint down, DNS,
    /// timeout) returns `Ok(None)` after a warning so offline clusters keep
    /// scanning; an HTTP error status is a `Delivery` error.
    pub fn upload(&self, result: &ScanResult) -> Result<Option<UploadReceipt>> {
        let url = format!("{}/api/v1/scans", self.endpoint);
        let response = match self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(result)
            .send()
        {
            Ok(response) => response,
            Err(err) => {
                warn!("delivery endpoint unreachable, keeping result local: {}", err);
                return Ok(None);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ScanError::Delivery(format!(
                "{} returned {}: {}",
                url,
                status,
                body.trim()
            )));
        }

        let receipt = response
            .json::<UploadReceipt>()
            .unwrap_or_else(|_| UploadReceipt {
                id: String::new(),
                message: String::new(),
            });
        info!("scan {} delivered to {}", result.id, self.endpoint);
        Ok(Some(receipt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::types::{ScanResult, ScanType};

    #[test]
    fn empty_endpoint_is_a_config_error() {
        assert!(matches!(
            DeliveryClient::new("", "token"),
            Err(ScanError::Config(_))
        ));
    }

    #[test]
    fn unreachable_endpoint_degrades_to_none() {
        // Port 1 on loopback refuses the connection immediately.
        let client = DeliveryClient::new("http://127.0.0.1:1", "token").unwrap();
        let result = ScanResult::new("scan-1", ScanType::Full, "test");
        assert!(client.upload(&result).unwrap().is_none());
    }

    #[test]
    fn trailing_slash_is_normalized() {
        let client = DeliveryClient::new("https://example.com/", "t").unwrap();
        assert_eq!(client.endpoint, "https://example.com");
    }
}
