use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use crate::config::StoreBackend;
use crate::constants::KEYRING_SERVICE;
use crate::error::{Error, Result};
use crate::token::TokenSet;

/// `<dir>/.<kind>_<hex(user_id)>.json`
///
/// The id is hex-encoded so that distinct ids never map to the same file,
/// including on case-insensitive filesystems.
pub(crate) fn user_file(dir: &Path, kind: &str, user_id: &str) -> PathBuf {
    dir.join(format!(".{}_{}.json", kind, hex::encode(user_id)))
}

/// Write `contents` to `path`, readable by the owner only on unix.
pub(crate) fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    // Create file with restricted permissions atomically to avoid TOCTOU
    #[cfg(unix)]
    {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(contents.as_bytes())?;
    }

    #[cfg(not(unix))]
    {
        fs::write(path, contents)?;
    }

    Ok(())
}

/// Durable `{user_id -> TokenSet}` persistence.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_tokens(&self, user_id: &str) -> Result<Option<TokenSet>>;
    async fn store_tokens(&self, user_id: &str, tokens: &TokenSet) -> Result<()>;
}

/// Readiness information about credential storage backends
#[derive(Debug, Clone)]
pub struct StoreStatus {
    pub keyring_enabled: bool,
    pub keyring_available: bool,
    pub dir: PathBuf,
    pub dir_writable: bool,
}

impl StoreStatus {
    /// At least one backend can persist tokens.
    pub fn is_ready(&self) -> bool {
        (self.keyring_enabled && self.keyring_available) || self.dir_writable
    }
}

impl std::fmt::Display for StoreStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Credential Storage Status:")?;
        writeln!(
            f,
            "  Keyring: {}",
            match (self.keyring_enabled, self.keyring_available) {
                (false, _) => "disabled",
                (true, true) => "available",
                (true, false) => "unavailable",
            }
        )?;
        writeln!(f, "  File fallback: {}", self.dir.display())?;
        writeln!(f, "  Writable: {}", self.dir_writable)?;
        writeln!(f, "  Ready: {}", self.is_ready())?;
        Ok(())
    }
}

/// OS keyring with a per-user 0600 JSON file fallback.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    dir: PathBuf,
    use_keyring: bool,
}

impl KeyringStore {
    /// Initialize the backend at startup. Creates the token directory so
    /// that later reads and writes never have to.
    pub fn open(dir: &Path, backend: StoreBackend) -> anyhow::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            use_keyring: backend == StoreBackend::Keyring,
        })
    }

    /// Check both backends.
    pub fn readiness(&self) -> StoreStatus {
        let keyring_available = self.use_keyring
            && match keyring::Entry::new(KEYRING_SERVICE, "readiness-check") {
                // Try a dummy operation to see if keyring works
                Ok(entry) => {
                    entry.set_password("__readiness__").is_ok()
                        && entry.get_password().is_ok()
                        && entry.delete_credential().is_ok()
                }
                Err(_) => false,
            };

        let marker = self.dir.join(".write-check");
        let dir_writable = fs::write(&marker, b"ok").is_ok() && fs::remove_file(&marker).is_ok();

        StoreStatus {
            keyring_enabled: self.use_keyring,
            keyring_available,
            dir: self.dir.clone(),
            dir_writable,
        }
    }

    fn keyring_key(user_id: &str) -> String {
        format!("tokens:{}", user_id)
    }

    fn token_file(&self, user_id: &str) -> PathBuf {
        user_file(&self.dir, "tokens", user_id)
    }

    /// Try to get the serialized token set from keyring
    fn keyring_get(&self, user_id: &str) -> Option<String> {
        if !self.use_keyring {
            return None;
        }
        let entry = keyring::Entry::new(KEYRING_SERVICE, &Self::keyring_key(user_id)).ok()?;
        entry.get_password().ok()
    }

    /// Try to set the serialized token set in keyring
    fn keyring_set(&self, user_id: &str, value: &str) -> bool {
        if !self.use_keyring {
            return false;
        }
        match keyring::Entry::new(KEYRING_SERVICE, &Self::keyring_key(user_id)) {
            Ok(entry) => entry.set_password(value).is_ok(),
            Err(_) => false,
        }
    }

    /// Read from file fallback
    fn file_get(&self, user_id: &str) -> std::io::Result<Option<String>> {
        match fs::read_to_string(self.token_file(user_id)) {
            Ok(s) if s.trim().is_empty() => Ok(None),
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write to file fallback (with restricted permissions)
    fn file_set(&self, user_id: &str, value: &str) -> std::io::Result<()> {
        write_private(&self.token_file(user_id), value)
    }

    fn load(&self, user_id: &str) -> Result<Option<TokenSet>> {
        let raw = match self.keyring_get(user_id) {
            Some(raw) => Some(raw),
            None => self.file_get(user_id).map_err(|e| Error::store(user_id, e))?,
        };

        raw.map(|raw| serde_json::from_str(&raw).map_err(|e| Error::store(user_id, e)))
            .transpose()
    }

    fn save(&self, user_id: &str, tokens: &TokenSet) -> Result<()> {
        let raw = serde_json::to_string(tokens).map_err(|e| Error::store(user_id, e))?;

        // Try keyring first and verify it actually worked
        if self.keyring_set(user_id, &raw) && self.keyring_get(user_id).as_deref() == Some(raw.as_str()) {
            return Ok(());
        }

        self.file_set(user_id, &raw)
            .map_err(|e| Error::store(user_id, e))
    }
}

#[async_trait]
impl CredentialStore for KeyringStore {
    async fn get_tokens(&self, user_id: &str) -> Result<Option<TokenSet>> {
        let store = self.clone();
        let user = user_id.to_string();
        tokio::task::spawn_blocking(move || store.load(&user))
            .await
            .map_err(|e| Error::store(user_id, e))?
    }

    async fn store_tokens(&self, user_id: &str, tokens: &TokenSet) -> Result<()> {
        let store = self.clone();
        let user = user_id.to_string();
        let tokens = tokens.clone();
        tokio::task::spawn_blocking(move || store.save(&user, &tokens))
            .await
            .map_err(|e| Error::store(user_id, e))?
    }
}

/// Process-local store
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryStore {
    tokens: std::sync::RwLock<std::collections::HashMap<String, TokenSet>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(self, user_id: &str, tokens: TokenSet) -> Self {
        self.tokens
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id.to_string(), tokens);
        self
    }
}

#[cfg(test)]
#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get_tokens(&self, user_id: &str) -> Result<Option<TokenSet>> {
        let tokens = self.tokens.read().map_err(|e| Error::store(user_id, e))?;
        Ok(tokens.get(user_id).cloned())
    }

    async fn store_tokens(&self, user_id: &str, tokens: &TokenSet) -> Result<()> {
        let mut map = self.tokens.write().map_err(|e| Error::store(user_id, e))?;
        map.insert(user_id.to_string(), tokens.clone());
        Ok(())
    }
}
