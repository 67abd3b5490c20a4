//! `AppConfig`: local JSON config with defaults applied on read.
//!
//! A missing file produces an all-defaults config; every top-level key
//! is individually defaultable so a partial file still loads (see
//! §4.10 / SPEC_FULL.md ambient configuration section).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Compact,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Compact
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            min: 20000,
            max: 21000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MidnightWindow {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl Default for MidnightWindow {
    fn default() -> Self {
        Self {
            start_hour: 2,
            end_hour: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    pub monitoring_secs: u64,
    /// `<= 0` disables the timer.
    pub report_metrics_secs: i64,
    /// `<= 0` disables the timer.
    pub log_reporting_secs: i64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            monitoring_secs: 30,
            report_metrics_secs: 0,
            log_reporting_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelClientTemplate {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for TunnelClientTemplate {
    fn default() -> Self {
        Self {
            command: "costrict-tunnel-client".to_string(),
            args: vec![
                "--local-port".to_string(),
                "{LocalPort}".to_string(),
                "--mapping-port".to_string(),
                "{MappingPort}".to_string(),
                "--remote".to_string(),
                "{RemoteAddr}".to_string(),
            ],
        }
    }
}

/// Local JSON configuration at `<baseDir>/config/costrict.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub listen_address: String,
    pub cloud_base_url: String,
    /// Overrides the suffix-derived pushgateway URL when set.
    pub pushgateway_url: Option<String>,
    /// Overrides the suffix-derived tunnel manager URL when set.
    pub tunnel_manager_url: Option<String>,
    /// Overrides the suffix-derived upgrade URL when set.
    pub upgrade_url: Option<String>,
    pub ports: PortRange,
    pub tunnel_client: TunnelClientTemplate,
    pub intervals: IntervalsConfig,
    pub midnight: MidnightWindow,
    pub log: LogConfig,
    pub no_set_path: bool,
    pub clean_cache: bool,
    /// PEM-encoded RSA public key used to verify package signatures.
    /// Must be set to a real key before any package `Get` will succeed;
    /// the empty default is only valid for local testing against an
    /// unsigned repository.
    pub package_public_key: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8999".to_string(),
            cloud_base_url: "https://costrict.example.com/repo".to_string(),
            pushgateway_url: None,
            tunnel_manager_url: None,
            upgrade_url: None,
            ports: PortRange::default(),
            tunnel_client: TunnelClientTemplate::default(),
            intervals: IntervalsConfig::default(),
            midnight: MidnightWindow::default(),
            log: LogConfig::default(),
            no_set_path: false,
            clean_cache: true,
            package_public_key: String::new(),
        }
    }
}

impl AppConfig {
    /// Loads from `path`. A missing file yields `Self::default()`
    /// rather than an error.
    pub async fn load(path: &Path) -> ConfigResult<Self> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    cause: e.to_string(),
                });
            }
        };
        serde_json::from_str(&raw).map_err(|e| ConfigError::Decode {
            path: path.display().to_string(),
            cause: e.to_string(),
        })
    }

    #[must_use]
    pub fn pushgateway_url(&self) -> String {
        self.pushgateway_url
            .clone()
            .unwrap_or_else(|| format!("{}/pushgateway", self.cloud_base_url))
    }

    #[must_use]
    pub fn tunnel_manager_url(&self) -> String {
        self.tunnel_manager_url
            .clone()
            .unwrap_or_else(|| format!("{}/tunnel", self.cloud_base_url))
    }

    #[must_use]
    pub fn upgrade_url(&self) -> String {
        self.upgrade_url
            .clone()
            .unwrap_or_else(|| format!("{}/upgrade", self.cloud_base_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("costrict.json");
        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.listen_address, "0.0.0.0:8999");
        assert_eq!(config.ports.min, 20000);
    }

    #[tokio::test]
    async fn partial_file_fills_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("costrict.json");
        tokio::fs::write(&path, r#"{ "listen_address": "127.0.0.1:9000" }"#)
            .await
            .unwrap();
        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.listen_address, "127.0.0.1:9000");
        assert_eq!(config.ports.min, 20000);
        assert!(config.clean_cache);
    }

    #[test]
    fn derived_urls_suffix_base() {
        let config = AppConfig::default();
        assert_eq!(
            config.tunnel_manager_url(),
            "https://costrict.example.com/repo/tunnel"
        );
        assert_eq!(
            config.pushgateway_url(),
            "https://costrict.example.com/repo/pushgateway"
        );
    }

    #[test]
    fn explicit_override_wins_over_derivation() {
        let mut config = AppConfig::default();
        config.tunnel_manager_url = Some("https://tun.example.com".to_string());
        assert_eq!(config.tunnel_manager_url(), "https://tun.example.com");
    }
}
