use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::crypto::{self, EncryptedBlob};
use crate::errors::StorageError;
use crate::key_manager::KeyManager;
use crate::secret::SecretProvider;
use crate::store::KeyValueStore;

/// File-based encrypted key-value store
///
/// Each key is stored in its own AES-256-GCM encrypted file. The data key
/// comes from the OS keyring with passphrase fallback.
///
/// # Directory Structure
/// ```text
/// ~/.config/tokenward/secure/
/// ├── meta.json              # Key derivation metadata
/// ├── lock                   # Advisory lock file
/// └── entries/
///     ├── accessToken.json   # Encrypted value
///     └── refreshToken.json
/// ```
#[derive(Debug)]
pub struct FileStore {
    entries_dir: PathBuf,
    lock_file: PathBuf,
    key_manager: KeyManager,
    /// In-memory cache of decrypted values
    cache: Arc<RwLock<HashMap<String, String>>>,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `storage_dir`
    pub async fn new(
        storage_dir: impl AsRef<Path>,
        secret_provider: Arc<dyn SecretProvider>,
    ) -> Result<Self, StorageError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        let entries_dir = storage_dir.join("entries");
        let lock_file = storage_dir.join("lock");

        fs::create_dir_all(&entries_dir).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            std::fs::set_permissions(&storage_dir, perms.clone())?;
            std::fs::set_permissions(&entries_dir, perms)?;
        }

        let key_manager = KeyManager::new(&storage_dir, secret_provider).await?;

        Ok(Self {
            entries_dir,
            lock_file,
            key_manager,
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Default storage directory for the current platform
    pub fn default_storage_dir() -> Result<PathBuf, StorageError> {
        let project_dirs = directories::ProjectDirs::from("", "", "tokenward").ok_or_else(|| {
            StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine config directory",
            ))
        })?;

        Ok(project_dirs.config_dir().to_path_buf())
    }

    /// Keys become file names, so only a conservative alphabet is accepted
    fn entry_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.entries_dir.join(format!("{key}.json")))
    }

    /// Acquire an exclusive lock on the storage
    fn acquire_lock(&self) -> Result<std::fs::File, StorageError> {
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_file)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StorageError::LockTimeout)?;

        Ok(lock_file)
    }

    async fn read_from_disk(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.entry_path(key)?;

        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let encrypted: EncryptedBlob =
            serde_json::from_str(&content).map_err(|_| StorageError::CorruptedStore)?;

        let plaintext = crypto::decrypt(self.key_manager.key(), &encrypted, key)?;
        let value = String::from_utf8(plaintext).map_err(|_| StorageError::CorruptedStore)?;

        Ok(Some(value))
    }

    async fn write_to_disk(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.entry_path(key)?;

        let encrypted = crypto::encrypt(self.key_manager.key(), value.as_bytes(), key)?;
        let encrypted_json = serde_json::to_string_pretty(&encrypted)?;

        // Atomic write: temp file, fsync, rename
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, encrypted_json).await?;

        let file = std::fs::File::open(&temp_path)?;
        file.sync_all()?;

        fs::rename(&temp_path, &path).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&path, perms)?;
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FileStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        {
            let cache = self.cache.read().await;
            if let Some(value) = cache.get(key) {
                return Ok(Some(value.clone()));
            }
        }

        let value = self.read_from_disk(key).await?;
        if let Some(ref value) = value {
            self.cache
                .write()
                .await
                .insert(key.to_string(), value.clone());
        }
        Ok(value)
    }

    #[instrument(skip(self, value))]
    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _lock = self.acquire_lock()?;

        self.write_to_disk(key, value).await?;
        self.cache
            .write()
            .await
            .insert(key.to_string(), value.to_string());

        debug!("Stored encrypted entry");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let _lock = self.acquire_lock()?;

        let path = self.entry_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.cache.write().await.remove(key);
        Ok(())
    }
}
