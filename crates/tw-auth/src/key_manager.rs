use std::path::Path;
use std::sync::Arc;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;
use zeroize::Zeroizing;

use crate::crypto::{self, EncryptionKey};
use crate::errors::StorageError;
use crate::secret::SecretProvider;

const SALT_LEN: usize = 32;
const META_FILE: &str = "meta.json";

// Argon2id parameters: m=64MB, t=3, p=1 (tests use a small memory cost)
#[cfg(not(test))]
const ARGON2_M_COST: u32 = 65536;
#[cfg(test)]
const ARGON2_M_COST: u32 = 1024;
const ARGON2_T_COST: u32 = 3;

#[cfg(feature = "keyring-support")]
const KEYRING_SERVICE: &str = "tokenward";
#[cfg(feature = "keyring-support")]
const KEYRING_ENTRY: &str = "store-key:v1";

/// Metadata for key derivation and storage format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMeta {
    pub version: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Base64-encoded salt for Argon2id (if using passphrase)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase_salt: Option<String>,
}

impl Default for KeyMeta {
    fn default() -> Self {
        Self {
            version: 1,
            created_at: chrono::Utc::now(),
            passphrase_salt: None,
        }
    }
}

/// Resolves the data key for a [`FileStore`](crate::FileStore)
///
/// Order of preference: OS keyring, passphrase-derived key, freshly generated
/// key (which is then kept in the keyring).
pub struct KeyManager {
    meta: KeyMeta,
    key: EncryptionKey,
}

impl KeyManager {
    pub async fn new(
        storage_dir: &Path,
        secret_provider: Arc<dyn SecretProvider>,
    ) -> Result<Self, StorageError> {
        let meta_path = storage_dir.join(META_FILE);

        let mut meta = if fs::try_exists(&meta_path).await? {
            let content = fs::read_to_string(&meta_path).await?;
            serde_json::from_str(&content)?
        } else {
            KeyMeta::default()
        };

        let key = Self::resolve_key(&mut meta, &secret_provider).await?;

        let meta_json = serde_json::to_string_pretty(&meta)?;
        fs::write(&meta_path, meta_json).await?;

        Ok(Self { meta, key })
    }

    /// Get the encryption key
    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }

    pub fn meta(&self) -> &KeyMeta {
        &self.meta
    }

    #[cfg(feature = "keyring-support")]
    async fn resolve_key(
        meta: &mut KeyMeta,
        secret_provider: &Arc<dyn SecretProvider>,
    ) -> Result<EncryptionKey, StorageError> {
        match Self::load_from_keyring() {
            Ok(key) => {
                debug!("Loaded storage key from OS keyring");
                return Ok(key);
            }
            Err(e) => debug!("Keyring unavailable ({}), trying passphrase", e),
        }

        if let Some(key) = Self::derive_from_passphrase(meta, secret_provider).await? {
            // Cache for next time; the passphrase can always re-derive it
            if let Err(e) = Self::save_to_keyring(&key) {
                tracing::warn!("Failed to save key to keyring: {}", e);
            }
            return Ok(key);
        }

        // A generated key only survives in the keyring, so failing to save it is fatal
        let key = EncryptionKey::generate()?;
        Self::save_to_keyring(&key)?;
        debug!("Generated new storage key and saved it to the OS keyring");
        Ok(key)
    }

    #[cfg(not(feature = "keyring-support"))]
    async fn resolve_key(
        meta: &mut KeyMeta,
        secret_provider: &Arc<dyn SecretProvider>,
    ) -> Result<EncryptionKey, StorageError> {
        Self::derive_from_passphrase(meta, secret_provider)
            .await?
            .ok_or(StorageError::PassphraseUnavailable)
    }

    #[cfg(feature = "keyring-support")]
    fn load_from_keyring() -> Result<EncryptionKey, StorageError> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_ENTRY)
            .map_err(|e| StorageError::Keyring(format!("Failed to access keyring: {e}")))?;

        let key_b64 = entry
            .get_password()
            .map_err(|e| StorageError::Keyring(format!("Failed to read from keyring: {e}")))?;

        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(key_b64)
            .map_err(|_| StorageError::CorruptedStore)?;

        let key: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| StorageError::CorruptedStore)?;

        Ok(EncryptionKey::from_bytes(key))
    }

    #[cfg(feature = "keyring-support")]
    fn save_to_keyring(key: &EncryptionKey) -> Result<(), StorageError> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_ENTRY)
            .map_err(|e| StorageError::Keyring(format!("Failed to access keyring: {e}")))?;

        let key_b64 = base64::engine::general_purpose::STANDARD.encode(key.as_bytes());

        entry
            .set_password(&key_b64)
            .map_err(|e| StorageError::Keyring(format!("Failed to write to keyring: {e}")))
    }

    /// Derive a key from the provider's passphrase using Argon2id
    ///
    /// Returns `Ok(None)` when the provider has no passphrase.
    async fn derive_from_passphrase(
        meta: &mut KeyMeta,
        secret_provider: &Arc<dyn SecretProvider>,
    ) -> Result<Option<EncryptionKey>, StorageError> {
        let Some(passphrase) = secret_provider
            .get_passphrase("Enter passphrase for token storage")
            .await
        else {
            return Ok(None);
        };

        let salt = if let Some(ref salt_b64) = meta.passphrase_salt {
            base64::engine::general_purpose::STANDARD
                .decode(salt_b64)
                .map_err(|_| StorageError::CorruptedStore)?
        } else {
            let mut salt = vec![0u8; SALT_LEN];
            crypto::fill_random(&mut salt)?;
            meta.passphrase_salt = Some(base64::engine::general_purpose::STANDARD.encode(&salt));
            salt
        };

        let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, 1, Some(32))
            .map_err(|e| StorageError::Crypto(format!("Invalid Argon2 params: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(passphrase.as_bytes(), &salt, &mut *key)
            .map_err(|e| StorageError::Crypto(format!("Key derivation failed: {e}")))?;

        Ok(Some(EncryptionKey::from_bytes(*key)))
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("meta", &self.meta)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
