// ============================================
// File: crates/quicvc-node/src/identity.rs
// ============================================
//! # Device Identity File
//!
//! ## Creation Reason
//! Credentials name the device's Ed25519 key in their issuer DID. If the
//! key changed on every start, every verified-peer record held by other
//! devices would go stale, so the keys are persisted.
//!
//! ## File Format
//! ```json
//! {
//!   "version": "1.0",
//!   "device_id": "laptop",
//!   "signing_key": "<64 hex chars, Ed25519 seed>",
//!   "encryption_key": "<64 hex chars, X25519 secret>",
//!   "created_at": "2024-01-01T00:00:00.000Z"
//! }
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The file holds secret keys; it is written with mode 0600 on Unix
//! - Loading validates key lengths before building key pairs
//!
//! ## Last Modified
//! v0.1.0 - Initial identity persistence

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use zeroize::Zeroizing;

use quicvc_core::credential::CredentialEngine;
use quicvc_core::crypto::{EncryptionKeyPair, IdentityKeyPair};

use crate::error::{NodeError, Result};

const IDENTITY_FILE_VERSION: &str = "1.0";

/// On-disk representation.
#[derive(Serialize, Deserialize)]
struct IdentityFile {
    version: String,
    device_id: String,
    signing_key: String,
    encryption_key: String,
    created_at: String,
}

/// A device's persistent keys and label.
pub struct DeviceIdentity {
    /// Local device label.
    pub device_id: String,
    /// Credential signing key.
    pub signing: IdentityKeyPair,
    /// Key-agreement key.
    pub encryption: EncryptionKeyPair,
    /// When the identity was created (RFC 3339).
    pub created_at: String,
}

impl DeviceIdentity {
    /// Generates a new identity.
    pub fn generate(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            signing: IdentityKeyPair::generate(),
            encryption: EncryptionKeyPair::generate(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Loads an identity file.
    ///
    /// # Errors
    /// Returns `Identity` if the file is unreadable or holds malformed keys.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| NodeError::identity(&path_str, e.to_string()))?;
        let file: IdentityFile = serde_json::from_str(&content)
            .map_err(|e| NodeError::identity(&path_str, e.to_string()))?;

        let signing_bytes = decode_key(&path_str, "signing_key", &file.signing_key)?;
        let encryption_bytes = decode_key(&path_str, "encryption_key", &file.encryption_key)?;

        let signing = IdentityKeyPair::from_bytes(&signing_bytes)
            .map_err(|e| NodeError::identity(&path_str, e.to_string()))?;
        let encryption = EncryptionKeyPair::from_bytes(&encryption_bytes)
            .map_err(|e| NodeError::identity(&path_str, e.to_string()))?;

        info!(path = %path_str, device_id = %file.device_id, "Identity loaded");

        Ok(Self {
            device_id: file.device_id,
            signing,
            encryption,
            created_at: file.created_at,
        })
    }

    /// Writes the identity file, creating parent directories.
    ///
    /// # Errors
    /// Returns `Identity` if the file cannot be written.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = IdentityFile {
            version: IDENTITY_FILE_VERSION.to_string(),
            device_id: self.device_id.clone(),
            signing_key: hex::encode(self.signing.to_bytes()),
            encryption_key: hex::encode(self.encryption.to_bytes()),
            created_at: self.created_at.clone(),
        };
        let content = Zeroizing::new(
            serde_json::to_string_pretty(&file)
                .map_err(|e| NodeError::identity(&path_str, e.to_string()))?,
        );
        tokio::fs::write(path, content.as_bytes()).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = tokio::fs::metadata(path).await?.permissions();
            perms.set_mode(0o600);
            tokio::fs::set_permissions(path, perms).await?;
        }

        info!(path = %path_str, "Identity saved");
        Ok(())
    }

    /// Loads the identity at `path`, or generates and saves one.
    ///
    /// # Errors
    /// Propagates load/save failures.
    pub async fn load_or_create(path: impl AsRef<Path>, device_id: &str) -> Result<Self> {
        let path = path.as_ref();
        if tokio::fs::try_exists(path).await? {
            Self::load(path).await
        } else {
            let identity = Self::generate(device_id);
            identity.save(path).await?;
            Ok(identity)
        }
    }

    /// Builds a credential engine around these keys.
    #[must_use]
    pub fn into_engine(self) -> CredentialEngine {
        CredentialEngine::with_keys(self.device_id, self.signing, self.encryption)
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("did", &self.signing.did())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

fn decode_key(path: &str, field: &str, value: &str) -> Result<Zeroizing<Vec<u8>>> {
    let bytes = Zeroizing::new(
        hex::decode(value).map_err(|e| NodeError::identity(path, format!("{field}: {e}")))?,
    );
    if bytes.len() != 32 {
        return Err(NodeError::identity(
            path,
            format!("{field}: expected 32 bytes, got {}", bytes.len()),
        ));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_load_preserves_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("identity.json");

        let original = DeviceIdentity::generate("laptop");
        original.save(&path).await.unwrap();

        let loaded = DeviceIdentity::load(&path).await.unwrap();
        assert_eq!(loaded.device_id, "laptop");
        assert_eq!(loaded.signing.did(), original.signing.did());
        assert_eq!(
            loaded.encryption.public_key_hex(),
            original.encryption.public_key_hex()
        );
    }

    #[tokio::test]
    async fn test_load_or_create_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let first = DeviceIdentity::load_or_create(&path, "a").await.unwrap();
        let second = DeviceIdentity::load_or_create(&path, "ignored").await.unwrap();
        assert_eq!(first.signing.did(), second.signing.did());
        assert_eq!(second.device_id, "a");
    }

    #[tokio::test]
    async fn test_rejects_short_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        let content = serde_json::json!({
            "version": "1.0",
            "device_id": "x",
            "signing_key": "abcd",
            "encryption_key": "00".repeat(32),
            "created_at": "2024-01-01T00:00:00.000Z"
        });
        tokio::fs::write(&path, content.to_string()).await.unwrap();

        let err = DeviceIdentity::load(&path).await.unwrap_err();
        assert!(matches!(err, NodeError::Identity { .. }));
        assert!(err.to_string().contains("signing_key"));
    }

    #[test]
    fn test_engine_uses_persisted_keys() {
        let identity = DeviceIdentity::generate("dev");
        let did = identity.signing.did();
        let engine = identity.into_engine();
        assert_eq!(engine.did(), did);
        assert_eq!(engine.device_id(), "dev");
    }
}
