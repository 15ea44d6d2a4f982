use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::instrument;

use crate::errors::StorageError;
use crate::session::Tokens;

/// Persisted state keys
pub mod keys {
    pub const ACCESS_TOKEN: &str = "accessToken";
    pub const REFRESH_TOKEN: &str = "refreshToken";
    pub const USER: &str = "user";
    pub const REGISTERED_USER: &str = "registeredUserData";
}

/// Opaque string key-value persistence
///
/// Deleting a key that does not exist succeeds.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value
    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory key-value store for testing and simple use cases
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .entries
            .read()
            .map_err(|_| StorageError::Poisoned)?
            .get(key)
            .cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .map_err(|_| StorageError::Poisoned)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .map_err(|_| StorageError::Poisoned)?
            .remove(key);
        Ok(())
    }
}

/// Tokens as read back from storage; either half may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl StoredTokens {
    /// The pair, if both halves survived
    pub fn into_pair(self) -> Option<Tokens> {
        Tokens::from_parts(self.access_token, self.refresh_token)
    }
}

/// Credential persistence on top of a secure key-value backend
///
/// The two keys are written independently, so a crash can leave one without
/// the other. Readers treat that as "no session".
#[derive(Clone)]
pub struct SecureTokenStore {
    backend: Arc<dyn KeyValueStore>,
}

impl SecureTokenStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    #[instrument(skip_all)]
    pub async fn save(&self, tokens: &Tokens) -> Result<(), StorageError> {
        self.backend
            .put(keys::ACCESS_TOKEN, &tokens.access_token)
            .await?;
        self.backend
            .put(keys::REFRESH_TOKEN, &tokens.refresh_token)
            .await
    }

    #[instrument(skip_all)]
    pub async fn load(&self) -> Result<StoredTokens, StorageError> {
        Ok(StoredTokens {
            access_token: self.backend.get(keys::ACCESS_TOKEN).await?,
            refresh_token: self.backend.get(keys::REFRESH_TOKEN).await?,
        })
    }

    /// Delete both keys, attempting the second even if the first fails
    #[instrument(skip_all)]
    pub async fn clear(&self) -> Result<(), StorageError> {
        let access = self.backend.delete(keys::ACCESS_TOKEN).await;
        let refresh = self.backend.delete(keys::REFRESH_TOKEN).await;
        access.and(refresh)
    }
}

/// Every persistence backend the auth state writes to
///
/// Credentials and the user profile live in the secure store; the pending
/// registration record lives in general storage.
#[derive(Clone)]
pub struct Storage {
    tokens: SecureTokenStore,
    secure: Arc<dyn KeyValueStore>,
    general: Arc<dyn KeyValueStore>,
}

impl Storage {
    pub fn new(secure: Arc<dyn KeyValueStore>, general: Arc<dyn KeyValueStore>) -> Self {
        Self {
            tokens: SecureTokenStore::new(Arc::clone(&secure)),
            secure,
            general,
        }
    }

    /// Storage backed by fresh in-memory stores
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    pub fn tokens(&self) -> &SecureTokenStore {
        &self.tokens
    }

    pub async fn load_user(&self) -> Result<Option<String>, StorageError> {
        self.secure.get(keys::USER).await
    }

    pub async fn save_user(&self, raw: &str) -> Result<(), StorageError> {
        self.secure.put(keys::USER, raw).await
    }

    pub async fn delete_user(&self) -> Result<(), StorageError> {
        self.secure.delete(keys::USER).await
    }

    pub async fn load_registration(&self) -> Result<Option<String>, StorageError> {
        self.general.get(keys::REGISTERED_USER).await
    }

    pub async fn save_registration(&self, raw: &str) -> Result<(), StorageError> {
        self.general.put(keys::REGISTERED_USER, raw).await
    }

    pub async fn delete_registration(&self) -> Result<(), StorageError> {
        self.general.delete(keys::REGISTERED_USER).await
    }
}
