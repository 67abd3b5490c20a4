//! The on-disk package store: stage, verify, activate, remove.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use costrict_core::{CostrictDir, VersionNumber};
use costrict_repo::{PackageMetadata, PackageType, RepoClient};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::error::{StoreError, StoreResult};
use crate::path_env;

/// Local on-disk layout for packages, with per-name serialization of
/// `Get`/`Activate`/`Remove`/`Upgrade`.
pub struct PackageStore {
    dir: CostrictDir,
    repo: RepoClient,
    public_key_pem: String,
    locks: std::sync::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PackageStore {
    #[must_use]
    pub fn new(dir: CostrictDir, repo: RepoClient, public_key_pem: impl Into<String>) -> Self {
        Self {
            dir,
            repo,
            public_key_pem: public_key_pem.into(),
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// The full active metadata for `name`, or `None` if not installed.
    pub fn active_metadata(&self, name: &str) -> StoreResult<Option<PackageMetadata>> {
        let path = self.dir.active_metadata_path(name);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(self.read_metadata(&path)?))
    }

    /// `GetLocalVersion(name)`. `Ok(None)` is `NotInstalled` — a normal
    /// signal, not an error.
    pub fn get_local_version(&self, name: &str) -> StoreResult<Option<VersionNumber>> {
        let path = self.dir.active_metadata_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let metadata = self.read_metadata(&path)?;
        Ok(Some(metadata.version_id))
    }

    /// `Get(name, spec?)`. Resolves the target version, stages and
    /// verifies the payload. Does not activate.
    pub async fn get(
        &self,
        name: &str,
        spec: Option<VersionNumber>,
    ) -> StoreResult<(PackageMetadata, bool)> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;
        self.get_locked(name, spec).await
    }

    async fn get_locked(
        &self,
        name: &str,
        spec: Option<VersionNumber>,
    ) -> StoreResult<(PackageMetadata, bool)> {
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        let platform = self.repo.platform_info(name, os, arch).await?;

        let local_version = self.get_local_version(name)?;

        let target = if let Some(wanted) = spec {
            platform
                .versions
                .iter()
                .find(|v| v.version_id == wanted)
                .cloned()
                .ok_or_else(|| StoreError::VersionNotFound(wanted.print()))?
        } else {
            let newer_available = match local_version {
                Some(local) => local.compare(&platform.newest.version_id) == std::cmp::Ordering::Less,
                None => true,
            };
            if !newer_available {
                let active = self.read_metadata(&self.dir.active_metadata_path(name))?;
                return Ok((active, false));
            }
            platform.newest.clone()
        };

        let metadata = self.repo.metadata(&target.info_url).await?;
        let payload = self.repo.payload(&target.app_url).await?;

        let version_str = metadata.version_id.print();
        let staged_dir = self.dir.staged_payload_dir(&version_str);
        tokio::fs::create_dir_all(&staged_dir).await?;
        let staged_payload_path = staged_dir.join(metadata.file_name());
        tokio::fs::write(&staged_payload_path, &payload).await?;

        if let Err(e) = costrict_crypto::verify_checksum(&payload, &metadata.checksum) {
            warn!(package = name, version = %version_str, "checksum mismatch staging package");
            return Err(match e {
                costrict_crypto::CryptoError::ChecksumMismatch => {
                    StoreError::ChecksumMismatch(name.to_string())
                }
                other => StoreError::Decode {
                    path: staged_payload_path.display().to_string(),
                    cause: other.to_string(),
                },
            });
        }
        if let Err(_e) = costrict_crypto::verify_signature(
            &self.public_key_pem,
            &metadata.checksum,
            &metadata.sign,
        ) {
            warn!(package = name, version = %version_str, "signature invalid staging package");
            return Err(StoreError::SignatureInvalid(name.to_string()));
        }

        let per_version_path = self.dir.staged_metadata_path(name, &version_str);
        self.write_metadata(&per_version_path, &metadata).await?;

        info!(package = name, version = %version_str, "staged package");
        Ok((metadata, true))
    }

    /// `Activate(name, version)`. Atomically makes a staged version
    /// current.
    pub async fn activate(
        &self,
        name: &str,
        version: VersionNumber,
        install_dir: &Path,
        no_set_path: bool,
    ) -> StoreResult<()> {
        let version_str = version.print();
        let per_version_path = self.dir.staged_metadata_path(name, &version_str);
        let metadata = self.read_metadata(&per_version_path)?;

        tokio::fs::create_dir_all(install_dir).await?;
        let staged_payload_path = self
            .dir
            .staged_payload_dir(&version_str)
            .join(metadata.file_name());
        let installed_path = install_dir.join(metadata.file_name());
        tokio::fs::copy(&staged_payload_path, &installed_path).await?;

        if matches!(metadata.package_type, PackageType::Exec) {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mut perms = tokio::fs::metadata(&installed_path).await?.permissions();
                perms.set_mode(perms.mode() | 0o111);
                tokio::fs::set_permissions(&installed_path, perms).await?;
            }
        }

        let active_path = self.dir.active_metadata_path(name);
        self.write_metadata(&active_path, &metadata).await?;

        if matches!(metadata.package_type, PackageType::Exec) && !no_set_path {
            path_env::ensure_on_path(install_dir)?;
        }

        info!(package = name, version = %version_str, "activated package");
        Ok(())
    }

    /// After activation, optionally deletes the staging directory and
    /// per-version metadata file for the just-activated version.
    pub async fn clean_staged_version(&self, name: &str, version: VersionNumber) -> StoreResult<()> {
        let version_str = version.print();
        let staged_dir = self.dir.staged_payload_dir(&version_str);
        if staged_dir.exists() {
            tokio::fs::remove_dir_all(&staged_dir).await?;
        }
        let per_version_path = self.dir.staged_metadata_path(name, &version_str);
        if per_version_path.exists() {
            tokio::fs::remove_file(&per_version_path).await?;
        }
        Ok(())
    }

    /// `Upgrade(name, spec?)` = `Get` then, if `upgraded`, `Activate`.
    pub async fn upgrade(
        &self,
        name: &str,
        install_dir: &Path,
        spec: Option<VersionNumber>,
        no_set_path: bool,
        clean_cache: bool,
    ) -> StoreResult<(PackageMetadata, bool)> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let (metadata, upgraded) = self.get_locked(name, spec).await?;
        if upgraded {
            self.activate(name, metadata.version_id, install_dir, no_set_path)
                .await?;
            if clean_cache {
                self.clean_staged_version(name, metadata.version_id).await?;
            }
        }
        Ok((metadata, upgraded))
    }

    /// `Remove(name)`. Idempotent if already absent.
    pub async fn remove(&self, name: &str, install_dir: &Path) -> StoreResult<()> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let active_path = self.dir.active_metadata_path(name);
        if !active_path.exists() {
            return Ok(());
        }
        let metadata = self.read_metadata(&active_path)?;
        let installed_path = install_dir.join(metadata.file_name());
        if installed_path.exists() {
            tokio::fs::remove_file(&installed_path).await?;
        }
        tokio::fs::remove_file(&active_path).await?;
        info!(package = name, "removed package");
        Ok(())
    }

    /// Prunes stale per-version metadata and staged payload directories
    /// not equal to each package's active version.
    pub async fn cleanup_old_versions(&self) -> StoreResult<()> {
        let package_dir = self.dir.package_dir();
        let mut entries = match tokio::fs::read_dir(&package_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut active_versions: HashMap<String, String> = HashMap::new();
        let mut staged: Vec<(String, String, std::path::PathBuf)> = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = file_name.strip_suffix(".json") else {
                continue;
            };
            match stem.rsplit_once('-') {
                None => {
                    if let Ok(metadata) = self.read_metadata(&entry.path()) {
                        active_versions.insert(stem.to_string(), metadata.version_id.print());
                    }
                }
                Some((package_name, version)) => {
                    staged.push((package_name.to_string(), version.to_string(), entry.path()));
                }
            }
        }

        for (package_name, version, path) in staged {
            let is_active = active_versions
                .get(&package_name)
                .is_some_and(|active| active == &version);
            if is_active {
                continue;
            }
            tokio::fs::remove_file(&path).await.ok();
            let staged_dir = self.dir.staged_payload_dir(&version);
            if staged_dir.exists() {
                tokio::fs::remove_dir_all(&staged_dir).await.ok();
            }
        }

        Ok(())
    }

    fn read_metadata(&self, path: &Path) -> StoreResult<PackageMetadata> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| StoreError::Decode {
            path: path.display().to_string(),
            cause: e.to_string(),
        })
    }

    async fn write_metadata(&self, path: &Path, metadata: &PackageMetadata) -> StoreResult<()> {
        let raw = serde_json::to_vec_pretty(metadata).map_err(|e| StoreError::Decode {
            path: path.display().to_string(),
            cause: e.to_string(),
        })?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, raw).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1::EncodeRsaPublicKey;
    use rsa::pkcs1::LineEnding;
    use rsa::pkcs1v15::SigningKey;
    use rsa::signature::{SignatureEncoding, Signer};
    use rsa::{RsaPrivateKey, RsaPublicKey};
    use sha2::Sha256;
    use wiremock::matchers::{method, path as wpath};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        _mock: MockServer,
        _tmp: tempfile::TempDir,
        store: PackageStore,
        install_dir: std::path::PathBuf,
        public_key_pem: String,
        private_key: RsaPrivateKey,
    }

    fn sign(private: &RsaPrivateKey, checksum: &str) -> String {
        let signing_key = SigningKey::<Sha256>::new(private.clone());
        let signature = signing_key.sign(checksum.as_bytes());
        hex::encode(signature.to_bytes())
    }

    async fn fixture() -> Fixture {
        let mock = MockServer::start().await;
        let tmp = tempfile::tempdir().unwrap();
        let dir = CostrictDir::from_path(tmp.path());
        dir.ensure().unwrap();
        let repo = costrict_repo::RepoClient::new(mock.uri(), false).unwrap();

        let private_key = RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 2048).unwrap();
        let public_key = RsaPublicKey::from(&private_key);
        let public_key_pem = public_key.to_pkcs1_pem(LineEnding::LF).unwrap().to_string();

        let install_dir = tmp.path().join("install");
        let store = PackageStore::new(dir, repo, public_key_pem.clone());

        Fixture {
            _mock: mock,
            _tmp: tmp,
            store,
            install_dir,
            public_key_pem,
            private_key,
        }
    }

    async fn mount_platform(server: &MockServer, newest: &str, versions: &[&str]) {
        let versions_json: Vec<serde_json::Value> = versions
            .iter()
            .map(|v| {
                serde_json::json!({
                    "versionId": v,
                    "appUrl": format!("/demo/{v}/app"),
                    "infoUrl": format!("/demo/{v}/info"),
                })
            })
            .collect();
        let body = serde_json::json!({
            "packageName": "demo",
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "newest": {
                "versionId": newest,
                "appUrl": format!("/demo/{newest}/app"),
                "infoUrl": format!("/demo/{newest}/info"),
            },
            "versions": versions_json,
        });
        Mock::given(method("GET"))
            .and(wpath(format!(
                "/demo/{}/{}/platform.json",
                std::env::consts::OS,
                std::env::consts::ARCH
            )))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_metadata_and_payload(
        server: &MockServer,
        version: &str,
        payload: &[u8],
        private_key: &RsaPrivateKey,
    ) {
        let checksum = costrict_crypto::md5_hex(payload);
        let sign = sign(private_key, &checksum);
        let metadata = serde_json::json!({
            "packageName": "demo",
            "packageType": "exec",
            "fileName": "demo",
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "size": payload.len(),
            "checksum": checksum,
            "checksumAlgo": "md5",
            "sign": sign,
            "versionId": version,
            "build": "",
            "description": "",
        });
        Mock::given(method("GET"))
            .and(wpath(format!("/demo/{version}/info")))
            .respond_with(ResponseTemplate::new(200).set_body_json(metadata))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(wpath(format!("/demo/{version}/app")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.to_vec()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn clean_install_upgrades_and_activates() {
        let f = fixture().await;
        mount_platform(&f._mock, "1.2.3", &["1.2.3"]).await;
        mount_metadata_and_payload(&f._mock, "1.2.3", b"binary-contents", &f.private_key).await;

        let (metadata, upgraded) = f
            .store
            .upgrade("demo", &f.install_dir, None, false, false)
            .await
            .unwrap();
        assert!(upgraded);
        assert_eq!(metadata.version_id, VersionNumber::new(1, 2, 3));

        let installed = f.install_dir.join("demo");
        assert!(installed.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::metadata(&installed).unwrap().permissions();
            assert_ne!(perms.mode() & 0o111, 0);
        }

        let local = f.store.get_local_version("demo").unwrap();
        assert_eq!(local, Some(VersionNumber::new(1, 2, 3)));
    }

    #[tokio::test]
    async fn noop_when_already_current() {
        let f = fixture().await;
        mount_platform(&f._mock, "1.2.3", &["1.2.3"]).await;
        mount_metadata_and_payload(&f._mock, "1.2.3", b"v1", &f.private_key).await;

        f.store
            .upgrade("demo", &f.install_dir, None, false, false)
            .await
            .unwrap();
        let active_path = f.store.active_metadata_path_for_test("demo");
        let before = std::fs::read_to_string(&active_path).unwrap();

        let (metadata, upgraded) = f
            .store
            .upgrade("demo", &f.install_dir, None, false, false)
            .await
            .unwrap();
        assert!(!upgraded);
        assert_eq!(metadata.version_id, VersionNumber::new(1, 2, 3));
        let after = std::fs::read_to_string(&active_path).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn signature_tamper_fails_and_does_not_activate() {
        let f = fixture().await;
        mount_platform(&f._mock, "1.2.3", &["1.2.3"]).await;

        let payload = b"binary-contents";
        let checksum = costrict_crypto::md5_hex(payload);
        let metadata = serde_json::json!({
            "packageName": "demo",
            "packageType": "exec",
            "fileName": "demo",
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "size": payload.len(),
            "checksum": checksum,
            "checksumAlgo": "md5",
            "sign": hex::encode([0u8; 256]),
            "versionId": "1.2.3",
            "build": "",
            "description": "",
        });
        Mock::given(method("GET"))
            .and(wpath("/demo/1.2.3/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(metadata))
            .mount(&f._mock)
            .await;
        Mock::given(method("GET"))
            .and(wpath("/demo/1.2.3/app"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.to_vec()))
            .mount(&f._mock)
            .await;

        let err = f
            .store
            .upgrade("demo", &f.install_dir, None, false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SignatureInvalid(_)));
        assert!(!f.store.active_metadata_path_for_test("demo").exists());
        let _ = f.public_key_pem;
    }

    #[tokio::test]
    async fn explicit_version_not_in_remote_list_fails() {
        let f = fixture().await;
        mount_platform(&f._mock, "1.2.3", &["1.2.3"]).await;

        let err = f
            .store
            .get("demo", Some(VersionNumber::new(9, 9, 9)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionNotFound(_)));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let f = fixture().await;
        f.store.remove("demo", &f.install_dir).await.unwrap();
        f.store.remove("demo", &f.install_dir).await.unwrap();
    }

    #[tokio::test]
    async fn remove_after_install_clears_active_metadata_and_artifact() {
        let f = fixture().await;
        mount_platform(&f._mock, "1.2.3", &["1.2.3"]).await;
        mount_metadata_and_payload(&f._mock, "1.2.3", b"payload", &f.private_key).await;

        f.store
            .upgrade("demo", &f.install_dir, None, false, false)
            .await
            .unwrap();
        f.store.remove("demo", &f.install_dir).await.unwrap();

        assert!(!f.install_dir.join("demo").exists());
        assert_eq!(f.store.get_local_version("demo").unwrap(), None);
    }

    #[tokio::test]
    async fn clean_cache_prunes_staged_version_matching_active() {
        let f = fixture().await;
        mount_platform(&f._mock, "1.2.3", &["1.2.3"]).await;
        mount_metadata_and_payload(&f._mock, "1.2.3", b"payload", &f.private_key).await;

        f.store
            .upgrade("demo", &f.install_dir, None, false, true)
            .await
            .unwrap();

        let staged_dir = f.store.staged_payload_dir_for_test("1.2.3");
        assert!(!staged_dir.exists());
    }

    impl PackageStore {
        fn active_metadata_path_for_test(&self, name: &str) -> std::path::PathBuf {
            self.dir.active_metadata_path(name)
        }

        fn staged_payload_dir_for_test(&self, version: &str) -> std::path::PathBuf {
            self.dir.staged_payload_dir(version)
        }
    }
}
