//! Auth identity loaded from `<share>/auth.json`.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{ConfigError, ConfigResult};

/// `{ id, name, access_token, machine_id, base_url }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthIdentity {
    pub id: String,
    pub name: String,
    pub access_token: String,
    pub machine_id: String,
    pub base_url: String,
}

impl AuthIdentity {
    /// The value to send as the `Authorization` header.
    #[must_use]
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Loads and caches `AuthIdentity` from a local file.
pub struct AuthStore {
    path: PathBuf,
    cached: Arc<RwLock<Option<AuthIdentity>>>,
}

impl AuthStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cached: Arc::new(RwLock::new(None)),
        }
    }

    /// Loads from disk on first call; subsequent calls return the cache.
    pub async fn identity(&self) -> ConfigResult<AuthIdentity> {
        if let Some(identity) = self.cached.read().await.clone() {
            return Ok(identity);
        }

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ConfigError::Io {
                path: self.path.display().to_string(),
                cause: e.to_string(),
            })?;
        let identity: AuthIdentity =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Decode {
                path: self.path.display().to_string(),
                cause: e.to_string(),
            })?;
        *self.cached.write().await = Some(identity.clone());
        Ok(identity)
    }

    /// Returns the `Authorization` header value, loading identity first
    /// if not yet cached.
    pub async fn auth_header(&self) -> ConfigResult<String> {
        Ok(self.identity().await?.auth_header())
    }
}
