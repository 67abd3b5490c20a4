//! HTTPS client for the cloud tunnel manager.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{TunnelError, TunnelResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct AllocateRequest<'a> {
    #[serde(rename = "clientId")]
    client_id: &'a str,
    #[serde(rename = "appName")]
    app_name: &'a str,
    #[serde(rename = "clientPort")]
    client_port: u16,
}

#[derive(Debug, Deserialize)]
struct AllocateResponse {
    #[serde(rename = "mappingPort")]
    mapping_port: u16,
}

#[derive(Debug, Deserialize)]
struct DriftResponse {
    #[serde(rename = "mappingPort")]
    mapping_port: u16,
}

/// Result of a drift check against the tunnel manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftCheck {
    /// Remote mapping still matches; no action needed.
    Healthy,
    /// Either not found (404) or the mapping changed; a reopen is needed.
    NeedsRestart,
}

/// Thin HTTPS client over the tunnel manager's port-allocation endpoints.
#[derive(Debug, Clone)]
pub struct TunnelManagerClient {
    http: Client,
    base_url: String,
}

impl TunnelManagerClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client with only a timeout configured cannot fail to build");
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// `POST {base}/ports`.
    pub async fn allocate(
        &self,
        name: &str,
        auth_header: &str,
        client_id: &str,
        app_name: &str,
        client_port: u16,
    ) -> TunnelResult<u16> {
        let url = format!("{}/ports", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Authorization", auth_header)
            .json(&AllocateRequest {
                client_id,
                app_name,
                client_port,
            })
            .send()
            .await
            .map_err(|e| TunnelError::AllocationFailed {
                name: name.to_string(),
                cause: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TunnelError::AllocationFailed {
                name: name.to_string(),
                cause: format!("status {status}: {body}"),
            });
        }

        let parsed: AllocateResponse =
            response.json().await.map_err(|e| TunnelError::Decode {
                name: name.to_string(),
                cause: e.to_string(),
            })?;
        Ok(parsed.mapping_port)
    }

    /// `GET {base}/ports/{clientId}/{appName}`.
    pub async fn check_drift(
        &self,
        name: &str,
        auth_header: &str,
        client_id: &str,
        app_name: &str,
        current_mapping_port: u16,
    ) -> TunnelResult<DriftCheck> {
        let url = format!("{}/ports/{client_id}/{app_name}", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("Authorization", auth_header)
            .send()
            .await
            .map_err(|e| TunnelError::AllocationFailed {
                name: name.to_string(),
                cause: e.to_string(),
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(DriftCheck::NeedsRestart);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TunnelError::AllocationFailed {
                name: name.to_string(),
                cause: format!("status {status}: {body}"),
            });
        }

        let parsed: DriftResponse =
            response.json().await.map_err(|e| TunnelError::Decode {
                name: name.to_string(),
                cause: e.to_string(),
            })?;
        if parsed.mapping_port == current_mapping_port {
            Ok(DriftCheck::Healthy)
        } else {
            Ok(DriftCheck::NeedsRestart)
        }
    }
}
