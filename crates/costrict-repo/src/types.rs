//! Wire types returned by the package repository.

use costrict_core::VersionNumber;
use serde::{Deserialize, Serialize};

/// The kind of payload a package installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    Exec,
    Conf,
}

/// Server-issued, signature-verified package metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub package_name: String,
    pub package_type: PackageType,
    /// Basename of the installed artifact; defaults to `package_name`.
    #[serde(default)]
    pub file_name: Option<String>,
    pub os: String,
    pub arch: String,
    pub size: u64,
    /// MD5 hex of the payload.
    pub checksum: String,
    pub checksum_algo: String,
    /// Hex-encoded RSA signature over the ASCII checksum.
    pub sign: String,
    pub version_id: VersionNumber,
    #[serde(default)]
    pub build: String,
    #[serde(default)]
    pub description: String,
}

impl PackageMetadata {
    /// Basename of the installed artifact, defaulting to `package_name`.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.file_name.as_deref().unwrap_or(&self.package_name)
    }
}

/// One addressable version of a package for a given platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionAddr {
    pub version_id: VersionNumber,
    pub app_url: String,
    pub info_url: String,
}

/// `GET /<name>/<os>/<arch>/platform.json` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub package_name: String,
    pub os: String,
    pub arch: String,
    pub newest: VersionAddr,
    pub versions: Vec<VersionAddr>,
}

/// `GET /<name>/platforms.json` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformList {
    pub package_name: String,
    pub platforms: Vec<PlatformTuple>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformTuple {
    pub os: String,
    pub arch: String,
}

/// `GET /packages.json` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageList {
    pub packages: Vec<String>,
}
