use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use zeroize::ZeroizeOnDrop;

use crate::errors::StorageError;

const NONCE_LEN: usize = 12;
const AAD_VERSION: &str = "v1";

/// AES-256 key (32 bytes)
#[derive(Clone, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; 32],
}

impl EncryptionKey {
    /// Generate a new random encryption key
    pub fn generate() -> Result<Self, StorageError> {
        let mut key = [0u8; 32];
        fill_random(&mut key)?;
        Ok(Self { key })
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { key: bytes }
    }

    /// Get key bytes (use carefully - sensitive data)
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// Fill `buf` from the OS CSPRNG
pub fn fill_random(buf: &mut [u8]) -> Result<(), StorageError> {
    getrandom::fill(buf).map_err(|e| StorageError::Crypto(format!("OS RNG unavailable: {e}")))
}

/// Encrypted value with nonce and authentication tag
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EncryptedBlob {
    /// Base64url-encoded nonce (12 bytes)
    pub nonce: String,
    /// Base64url-encoded ciphertext + tag
    pub ciphertext: String,
    /// Additional authenticated data version
    pub aad_version: String,
}

/// AAD format: "tokenward|{version}|{storage_key}"
fn aad(version: &str, storage_key: &str) -> String {
    format!("tokenward|{version}|{storage_key}")
}

fn cipher(key: &EncryptionKey) -> Result<Aes256Gcm, StorageError> {
    Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| StorageError::Crypto(format!("Invalid key length: {e}")))
}

/// Encrypt `plaintext` with AES-256-GCM, bound to `storage_key`
pub fn encrypt(
    key: &EncryptionKey,
    plaintext: &[u8],
    storage_key: &str,
) -> Result<EncryptedBlob, StorageError> {
    let cipher = cipher(key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    fill_random(&mut nonce_bytes)?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = aad(AAD_VERSION, storage_key);
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|e| StorageError::Crypto(format!("Encryption failed: {e}")))?;

    Ok(EncryptedBlob {
        nonce: URL_SAFE_NO_PAD.encode(nonce_bytes),
        ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
        aad_version: AAD_VERSION.to_string(),
    })
}

/// Decrypt a blob written by [`encrypt`] for the same `storage_key`
pub fn decrypt(
    key: &EncryptionKey,
    blob: &EncryptedBlob,
    storage_key: &str,
) -> Result<Vec<u8>, StorageError> {
    let cipher = cipher(key)?;

    let nonce_bytes = URL_SAFE_NO_PAD
        .decode(&blob.nonce)
        .map_err(|_| StorageError::CorruptedStore)?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(StorageError::CorruptedStore);
    }
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = URL_SAFE_NO_PAD
        .decode(&blob.ciphertext)
        .map_err(|_| StorageError::CorruptedStore)?;

    let aad = aad(&blob.aad_version, storage_key);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: &ciphertext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| StorageError::CorruptedStore)
}
