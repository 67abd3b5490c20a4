//! Tunnel configuration, status, and the on-disk cache record.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// `Running` / `Stopped` / fail-closed `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    Error,
    Running,
    Stopped,
}

/// One local-port-to-remote-mapping-port pair owned by a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelPair {
    pub local_port: u16,
    pub mapping_port: u16,
}

/// Static identity and launch parameters for a tunnel.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub name: String,
    pub app_name: String,
    pub client_id: String,
    pub local_port: u16,
    /// Template-expanded per §4.6 step 3: `{AppName}`, `{LocalPort}`,
    /// `{MappingPort}`, `{RemoteAddr}`, `{ProcessName}`, `{ProcessPath}`.
    pub command: String,
    pub args: Vec<String>,
    pub process_name: String,
    pub remote_addr: String,
}

/// `<cache>/tunnels/<name>.json`, persisted on every significant transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelCache {
    pub name: String,
    pub pairs: Vec<TunnelPair>,
    pub status: TunnelStatus,
    #[serde(with = "time_serde")]
    pub created_time: Option<SystemTime>,
    pub pid: u32,
}

mod time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(
        value: &Option<SystemTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let secs = value.and_then(|t| t.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs()));
        secs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<SystemTime>, D::Error> {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(|s| UNIX_EPOCH + Duration::from_secs(s)))
    }
}
