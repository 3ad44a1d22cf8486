use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use keyring::Entry;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::session::{Session, UserIdentity};

/// Keychain service name for the keyring backend
const SERVICE_NAME: &str = "techblog";

/// Entry holding the raw bearer token
const TOKEN_KEY: &str = "token";

/// Entry holding the JSON-serialized user identity
const USER_KEY: &str = "user";

/// Durable string key-value storage underneath the credential store.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Removing a missing key succeeds.
    fn remove(&self, key: &str) -> Result<()>;
}

/// One file per key inside a directory readable only by its owner.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create credential directory {}", dir.display()))?;
        restrict_to_owner(&dir)?;
        Ok(Self { dir })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read credential entry: {}", key)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        // Unique temp file (mode 0600 on unix), then rename over the entry
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("Failed to create temp file for credential entry: {}", key))?;
        tmp.write_all(value.as_bytes())
            .with_context(|| format!("Failed to write credential entry: {}", key))?;
        tmp.persist(self.entry_path(key))
            .map_err(|e| e.error)
            .with_context(|| format!("Failed to commit credential entry: {}", key))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove credential entry: {}", key)),
        }
    }
}

#[cfg(unix)]
fn restrict_to_owner(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
        .with_context(|| format!("Failed to restrict credential directory {}", dir.display()))
}

#[cfg(not(unix))]
fn restrict_to_owner(_dir: &Path) -> Result<()> {
    Ok(())
}

/// OS keychain storage, one keychain entry per key.
pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for KeyringBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve entry from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store entry in keychain")
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete entry from keychain"),
        }
    }
}

/// Process-local storage; nothing survives a restart.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Persists the token/identity pair as two entries.
///
/// `save` writes the identity before the token and `clear` removes the token
/// before the identity, so an interrupted write always reads back as absent.
pub struct CredentialStore {
    backend: Arc<dyn StorageBackend>,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn save(&self, token: &str, user: &UserIdentity) -> Result<()> {
        let user_json = serde_json::to_string(user).context("Failed to serialize user identity")?;
        self.backend.set(USER_KEY, &user_json)?;
        self.backend.set(TOKEN_KEY, token)?;
        debug!(username = %user.username, "Credentials saved");
        Ok(())
    }

    /// Load the persisted pair. Missing, unreadable or corrupted entries all
    /// yield `None`.
    pub fn load(&self) -> Option<Session> {
        let token = match self.backend.get(TOKEN_KEY) {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read stored token");
                return None;
            }
        };

        let user_json = match self.backend.get(USER_KEY) {
            Ok(Some(json)) => json,
            Ok(None) => {
                warn!("Stored token has no matching user identity");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read stored user identity");
                return None;
            }
        };

        match serde_json::from_str::<UserIdentity>(&user_json) {
            Ok(user) => Some(Session { token, user }),
            Err(e) => {
                warn!(error = %e, "Stored user identity is corrupted");
                None
            }
        }
    }

    pub fn clear(&self) -> Result<()> {
        self.backend.remove(TOKEN_KEY)?;
        self.backend.remove(USER_KEY)?;
        Ok(())
    }

    /// True when either entry is still present, including a half-written pair.
    pub fn has_entries(&self) -> bool {
        [TOKEN_KEY, USER_KEY]
            .iter()
            .any(|key| matches!(self.backend.get(key), Ok(Some(_))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;

    fn sample_user() -> UserIdentity {
        UserIdentity {
            username: "a".to_string(),
            email: "a@b.com".to_string(),
            role: Role::User,
        }
    }

    #[test]
    fn test_save_then_load_returns_same_pair() {
        let store = CredentialStore::in_memory();
        store.save("T1", &sample_user()).unwrap();

        let session = store.load().expect("session should be present");
        assert_eq!(session.token, "T1");
        assert_eq!(session.user, sample_user());
    }

    #[test]
    fn test_load_empty_store_is_absent() {
        let store = CredentialStore::in_memory();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_corrupted_identity_reads_as_absent() {
        let backend = Arc::new(MemoryBackend::new());
        let store = CredentialStore::new(backend.clone());
        store.save("T1", &sample_user()).unwrap();

        backend.set(USER_KEY, "{not json").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_token_without_identity_reads_as_absent() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set(TOKEN_KEY, "T1").unwrap();

        let store = CredentialStore::new(backend);
        assert!(store.load().is_none());
        assert!(store.has_entries());
    }

    #[test]
    fn test_identity_with_unknown_role_reads_as_absent() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set(TOKEN_KEY, "T1").unwrap();
        backend
            .set(USER_KEY, r#"{"username":"a","email":"a@b.com","role":"ROOT"}"#)
            .unwrap();

        assert!(CredentialStore::new(backend).load().is_none());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = CredentialStore::in_memory();
        store.save("T1", &sample_user()).unwrap();

        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.load().is_none());
        assert!(!store.has_entries());
    }

    #[test]
    fn test_file_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");

        let store = CredentialStore::new(Arc::new(FileBackend::new(path.clone()).unwrap()));
        store.save("T1", &sample_user()).unwrap();
        drop(store);

        let reopened = CredentialStore::new(Arc::new(FileBackend::new(path).unwrap()));
        let session = reopened.load().expect("session should persist on disk");
        assert_eq!(session.token, "T1");
        assert_eq!(session.user.email, "a@b.com");
    }

    #[test]
    fn test_file_backend_remove_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().to_path_buf()).unwrap();
        assert!(backend.remove("token").is_ok());
        assert_eq!(backend.get("token").unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_backend_entries_are_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        let store = CredentialStore::new(Arc::new(FileBackend::new(path.clone()).unwrap()));
        store.save("SECRET", &sample_user()).unwrap();

        let dir_mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o077, 0, "directory mode {:o}", dir_mode);
        for key in [TOKEN_KEY, USER_KEY] {
            let mode = std::fs::metadata(path.join(key)).unwrap().permissions().mode();
            assert_eq!(mode & 0o077, 0, "{} mode {:o}", key, mode);
        }
    }

    #[test]
    fn test_file_backend_concurrent_writers_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FileBackend::new(dir.path().to_path_buf()).unwrap());

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let backend = Arc::clone(&backend);
                    scope.spawn(move || backend.set(TOKEN_KEY, &format!("T{}", i)))
                })
                .collect();
            for handle in handles {
                assert!(handle.join().unwrap().is_ok());
            }
        });

        let token = backend.get(TOKEN_KEY).unwrap().unwrap();
        assert!(token.starts_with('T'));
        // No temp files left behind
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_file_backend_overwrites_entry() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().to_path_buf()).unwrap();
        backend.set("token", "T1").unwrap();
        backend.set("token", "T2").unwrap();
        assert_eq!(backend.get("token").unwrap().as_deref(), Some("T2"));
    }
}
