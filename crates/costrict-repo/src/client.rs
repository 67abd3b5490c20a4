//! HTTPS client for the package repository.
//!
//! TLS certificate verification is enabled by default; the open question
//! in the original behavior (verification relaxed) is resolved here by
//! verifying by default and exposing an explicit opt-out (see DESIGN.md).

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::error::{RepoError, RepoResult};
use crate::types::{PackageList, PackageMetadata, PlatformInfo, PlatformList};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches catalogs, platform metadata, and binary payloads from a
/// package repository over HTTPS.
#[derive(Debug, Clone)]
pub struct RepoClient {
    http: Client,
    base_url: String,
}

impl RepoClient {
    /// Builds a client. `insecure_skip_verify` exists only to match
    /// deployments that still need certificate verification disabled;
    /// new deployments should leave it `false`.
    pub fn new(base_url: impl Into<String>, insecure_skip_verify: bool) -> RepoResult<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(insecure_skip_verify)
            .build()
            .map_err(|e| RepoError::NetworkError {
                url: base_url.clone().into(),
                cause: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> RepoResult<T> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| RepoError::NetworkError {
                url: url.to_string(),
                cause: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RepoError::NetworkError {
                url: url.to_string(),
                cause: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(RepoError::NetworkError {
                url: url.to_string(),
                cause: format!("status {status}: {body}"),
            });
        }

        serde_json::from_str(&body).map_err(|e| RepoError::DecodeError {
            url: url.to_string(),
            cause: e.to_string(),
        })
    }

    /// `GET /packages.json`.
    pub async fn packages(&self) -> RepoResult<PackageList> {
        self.get_json(&format!("{}/packages.json", self.base_url))
            .await
    }

    /// `GET /<name>/platforms.json`.
    pub async fn platforms(&self, name: &str) -> RepoResult<PlatformList> {
        self.get_json(&format!("{}/{name}/platforms.json", self.base_url))
            .await
    }

    /// `GET /<name>/<os>/<arch>/platform.json`.
    pub async fn platform_info(&self, name: &str, os: &str, arch: &str) -> RepoResult<PlatformInfo> {
        self.get_json(&format!(
            "{}/{name}/{os}/{arch}/platform.json",
            self.base_url
        ))
        .await
    }

    /// `GET <infoUrl>` — `infoUrl` is relative to `base_url`.
    pub async fn metadata(&self, info_url: &str) -> RepoResult<PackageMetadata> {
        self.get_json(&self.absolute(info_url)).await
    }

    /// `GET <appUrl>` — downloads the binary payload.
    pub async fn payload(&self, app_url: &str) -> RepoResult<Vec<u8>> {
        let url = self.absolute(app_url);
        let response =
            self.http
                .get(&url)
                .send()
                .await
                .map_err(|e| RepoError::NetworkError {
                    url: url.clone(),
                    cause: e.to_string(),
                })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RepoError::NetworkError {
                url,
                cause: format!("status {status}: {body}"),
            });
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| RepoError::NetworkError {
                url,
                cause: e.to_string(),
            })
    }

    fn absolute(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{path}", self.base_url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetches_package_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages.json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "packages": ["demo", "other"]
                })),
            )
            .mount(&server)
            .await;

        let client = RepoClient::new(server.uri(), false).unwrap();
        let list = client.packages().await.unwrap();
        assert_eq!(list.packages, vec!["demo".to_string(), "other".to_string()]);
    }

    #[tokio::test]
    async fn non_2xx_status_is_a_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages.json"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = RepoClient::new(server.uri(), false).unwrap();
        let err = client.packages().await.unwrap_err();
        assert!(matches!(err, RepoError::NetworkError { .. }));
    }

    #[tokio::test]
    async fn malformed_json_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/packages.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = RepoClient::new(server.uri(), false).unwrap();
        let err = client.packages().await.unwrap_err();
        assert!(matches!(err, RepoError::DecodeError { .. }));
    }
}
